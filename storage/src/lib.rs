//! Run history stores
//!
//! Both stores implement [`HistoryStore`] and hand out monotonically
//! increasing [`HistoryId`]s starting at 1.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use genai_stress_core::{HistoryId, HistoryStore, RunSummary, StressError, StressResult};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// One persisted summary with its identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Identifier assigned on save
    pub id: HistoryId,
    /// Frozen session summary
    pub summary: RunSummary,
}

/// History kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<Vec<HistoryRecord>>,
}

impl InMemoryHistoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in save order
    pub async fn list(&self) -> Vec<HistoryRecord> {
        self.records.read().await.clone()
    }

    /// Record by identifier
    pub async fn get(&self, id: HistoryId) -> Option<HistoryRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| record.id == id)
            .cloned()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing was stored
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save(&self, summary: RunSummary) -> StressResult<HistoryId> {
        let mut records = self.records.write().await;
        let id = HistoryId(records.last().map_or(1, |last| last.id.0 + 1));
        records.push(HistoryRecord { id, summary });
        Ok(id)
    }
}

/// History appended to a JSON-lines file, one record per line
#[derive(Debug)]
pub struct JsonLinesHistoryStore {
    path: PathBuf,
    append: Mutex<AppendState>,
}

#[derive(Debug)]
struct AppendState {
    last_id: u64,
    /// File may end mid-line, after a torn or interrupted write
    needs_newline: bool,
}

impl JsonLinesHistoryStore {
    /// Open or create the store at `path`, continuing its id sequence.
    ///
    /// Lines that do not parse are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read.
    pub async fn open(path: impl AsRef<Path>) -> StressResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (last_id, needs_newline) = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let last_id = parse_records(&path, &content)
                    .iter()
                    .map(|record| record.id.0)
                    .max()
                    .unwrap_or(0);
                (last_id, !content.is_empty() && !content.ends_with('\n'))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, false),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), last_id, needs_newline, "Opened history file");
        Ok(Self {
            path,
            append: Mutex::new(AppendState {
                last_id,
                needs_newline,
            }),
        })
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All readable records in file order
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn list(&self) -> StressResult<Vec<HistoryRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(parse_records(&self.path, &content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Record by identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub async fn get(&self, id: HistoryId) -> StressResult<Option<HistoryRecord>> {
        Ok(self.list().await?.into_iter().find(|record| record.id == id))
    }
}

#[async_trait]
impl HistoryStore for JsonLinesHistoryStore {
    async fn save(&self, summary: RunSummary) -> StressResult<HistoryId> {
        // held across the write so ids land in file order
        let mut append = self.append.lock().await;
        let id = HistoryId(append.last_id + 1);

        let record = HistoryRecord { id, summary };
        let encoded = serde_json::to_string(&record)
            .map_err(|e| StressError::history(format!("failed to encode summary: {e}")))?;

        let mut line = String::with_capacity(encoded.len() + 2);
        if append.needs_newline {
            line.push('\n');
        }
        line.push_str(&encoded);
        line.push('\n');

        // assume a torn tail until the whole line is down
        append.needs_newline = true;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        append.last_id = id.0;
        append.needs_newline = false;
        tracing::debug!(
            path = %self.path.display(),
            history_id = %id,
            session_id = %record.summary.session_id,
            "Saved run summary"
        );
        Ok(id)
    }
}

fn parse_records(path: &Path, content: &str) -> Vec<HistoryRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable history line"
                );
                None
            }
        })
        .collect()
}

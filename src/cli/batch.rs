//! Batch file loading
//!
//! ```toml
//! [defaults]
//! broadcast_throttle = "200ms"
//!
//! [defaults.thresholds]
//! max_consecutive_failures = { enabled = 5 }
//!
//! [[sessions]]
//! endpoint = "https://api.openai.com"
//! model = "gpt-4o-mini"
//! credential = "sk-..."
//! provider = "openai"
//! rate = { mode = "fixed", rpm = 60 }
//! duration = "5m"
//! ```

use std::path::Path;

use anyhow::{bail, Context, Result};
use genai_stress_core::{EngineDefaults, SessionConfig};
use serde::Deserialize;

use super::ThresholdArgs;

/// Contents of a batch file
#[derive(Debug, Clone, Deserialize)]
pub struct BatchFile {
    /// Engine defaults; every field optional
    #[serde(default)]
    pub defaults: EngineDefaults,

    /// One entry per session
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

impl BatchFile {
    /// Read and parse a batch file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse batch file: {}", path.display()))
    }

    /// Parse batch file text
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply command-line threshold overrides to the engine defaults
    pub fn apply_overrides(&mut self, overrides: &ThresholdArgs) {
        let thresholds = &mut self.defaults.thresholds;
        if let Some(floor) = overrides.success_threshold {
            thresholds.success_rate_floor = floor;
        }
        if let Some(max) = overrides.max_failures {
            thresholds.max_consecutive_failures = max;
        }
        if let Some(ceiling) = overrides.response_time_threshold {
            thresholds.response_time_ceiling_ms = ceiling;
        }
    }

    /// Check the defaults and every session before anything starts
    pub fn validate(&self) -> Result<()> {
        self.defaults
            .validate()
            .context("Invalid [defaults] table")?;

        if self.sessions.is_empty() {
            bail!("Batch file defines no [[sessions]]");
        }
        if self.sessions.len() > self.defaults.max_sessions {
            bail!(
                "Batch file defines {} sessions, at most {} run together",
                self.sessions.len(),
                self.defaults.max_sessions
            );
        }

        for (index, session) in self.sessions.iter().enumerate() {
            session
                .validate()
                .with_context(|| format!("Invalid session {}", index + 1))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genai_stress_core::{RateMode, Threshold};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const BATCH: &str = r#"
        [defaults]
        broadcast_throttle = "500ms"

        [defaults.thresholds]
        max_consecutive_failures = { enabled = 5 }

        [[sessions]]
        endpoint = "https://api.openai.com"
        model = "gpt-4o-mini"
        credential = "sk-test"
        provider = "openai"
        rate = { mode = "fixed", rpm = 60 }
        duration = "5m"

        [[sessions]]
        endpoint = "https://api.anthropic.com"
        model = "claude-3-haiku"
        credential = "sk-ant"
        provider = "claude"
        rate = { mode = "auto" }
    "#;

    #[test]
    fn test_parse_batch() {
        let batch = BatchFile::parse(BATCH).unwrap();
        assert_eq!(batch.sessions.len(), 2);
        assert_eq!(batch.defaults.broadcast_throttle, Duration::from_millis(500));
        assert_eq!(
            batch.defaults.thresholds.max_consecutive_failures,
            Threshold::Enabled(5)
        );
        assert_eq!(batch.sessions[0].rate, RateMode::Fixed { rpm: 60 });
        assert_eq!(batch.sessions[0].duration, Some(Duration::from_secs(300)));
        assert!(batch.sessions[1].rate.is_auto());
        batch.validate().unwrap();
    }

    #[test]
    fn test_missing_defaults_table() {
        let batch = BatchFile::parse(
            r#"
            [[sessions]]
            endpoint = "http://localhost:8080"
            model = "m"
            credential = "k"
            provider = "gemini"
            rate = { mode = "fixed", rpm = 10 }
            "#,
        )
        .unwrap();
        assert_eq!(batch.defaults, EngineDefaults::default());
        batch.validate().unwrap();
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let mut batch = BatchFile::parse(BATCH).unwrap();
        batch.apply_overrides(&ThresholdArgs {
            success_threshold: Some(Threshold::Disabled),
            max_failures: None,
            response_time_threshold: Some(Threshold::Enabled(30_000)),
        });

        let thresholds = batch.defaults.thresholds;
        assert_eq!(thresholds.success_rate_floor, Threshold::Disabled);
        assert_eq!(thresholds.max_consecutive_failures, Threshold::Enabled(5));
        assert_eq!(thresholds.response_time_ceiling_ms, Threshold::Enabled(30_000));
        assert_eq!(batch.defaults.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_reports_session_index() {
        let mut batch = BatchFile::parse(BATCH).unwrap();
        batch.sessions[1].credential.clear();
        let err = batch.validate().unwrap_err();
        assert!(format!("{err:#}").contains("Invalid session 2"));
    }

    #[test]
    fn test_validate_rejects_empty_and_oversized() {
        let empty = BatchFile::parse("").unwrap();
        assert!(empty.validate().is_err());

        let mut batch = BatchFile::parse(BATCH).unwrap();
        let extra = batch.sessions[0].clone();
        batch.sessions.extend(std::iter::repeat(extra).take(4));
        assert_eq!(batch.sessions.len(), 6);
        assert!(batch.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(BATCH.as_bytes()).unwrap();
        let batch = BatchFile::load(file.path()).unwrap();
        assert_eq!(batch.sessions[1].model, "claude-3-haiku");

        let err = BatchFile::load(Path::new("/nonexistent/batch.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read batch file"));
    }
}

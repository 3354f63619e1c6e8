//! JSON-lines observer on standard output

use std::io::Write;

use genai_stress_core::{DeliveryError, Observer};

/// Prints each broadcast message as one JSON line
#[derive(Debug, Default)]
pub struct StdoutObserver {
    events_only: bool,
}

impl StdoutObserver {
    /// Observer printing every message
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip coalesced `stateUpdate` snapshots
    pub fn events_only(mut self, events_only: bool) -> Self {
        self.events_only = events_only;
        self
    }

    fn wants(&self, payload: &str) -> bool {
        !self.events_only || message_type(payload).as_deref() != Some("stateUpdate")
    }
}

impl Observer for StdoutObserver {
    fn name(&self) -> &str {
        "stdout"
    }

    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        if !self.wants(payload) {
            return Ok(());
        }
        let mut out = std::io::stdout().lock();
        writeln!(out, "{payload}").map_err(|e| DeliveryError::Failed(e.to_string()))
    }
}

fn message_type(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    value.get("type")?.as_str().map(str::to_string)
}

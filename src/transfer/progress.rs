use crate::model::SourceId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Live state of one model's transfer.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub source: SourceId,
    pub downloaded: u64,
    pub total: u64,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
    pub error: Option<String>,
    pub completed: bool,
}

impl TransferState {
    fn new(source: SourceId) -> Self {
        Self {
            source,
            downloaded: 0,
            total: 0,
            started_at: Utc::now(),
            attempts: 0,
            error: None,
            completed: false,
        }
    }

    pub fn percent(&self) -> Option<f64> {
        (self.total > 0).then(|| self.downloaded as f64 / self.total as f64 * 100.0)
    }

    /// Average rate since the transfer began, in MiB/s.
    pub fn throughput_mib_s(&self) -> f64 {
        let elapsed = (Utc::now() - self.started_at).num_milliseconds();
        if elapsed <= 0 {
            return 0.0;
        }
        self.downloaded as f64 / (1024.0 * 1024.0) / (elapsed as f64 / 1000.0)
    }
}

/// Table of transfer states keyed by model name.
///
/// The only state shared between workers. Every method holds the lock just
/// for the map access; readers get copies.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    transfers: Mutex<HashMap<String, TransferState>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transfer. An existing entry for the name is kept.
    pub fn begin(&self, name: &str, source: SourceId) {
        self.transfers
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| TransferState::new(source));
    }

    pub fn update(&self, name: &str, downloaded: u64, total: u64) {
        if let Some(state) = self.transfers.lock().get_mut(name) {
            state.downloaded = downloaded;
            state.total = total;
        }
    }

    pub fn record_attempt(&self, name: &str, attempt: u32) {
        if let Some(state) = self.transfers.lock().get_mut(name) {
            state.attempts = attempt;
        }
    }

    pub fn finish(&self, name: &str) {
        if let Some(state) = self.transfers.lock().get_mut(name) {
            state.completed = true;
            state.error = None;
        }
    }

    pub fn fail(&self, name: &str, message: impl Into<String>) {
        if let Some(state) = self.transfers.lock().get_mut(name) {
            state.error = Some(message.into());
        }
    }

    pub fn snapshot(&self) -> HashMap<String, TransferState> {
        self.transfers.lock().clone()
    }
}

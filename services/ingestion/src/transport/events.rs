use std::sync::Mutex;

use crate::{SavedBatch, api::IngestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Saved,
    Rejected,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

/// One handled request, as reported to the server-side log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestEvent<'a> {
    pub outcome: Outcome,
    pub status: u16,
    pub participant_id: Option<&'a str>,
    pub filename: Option<&'a str>,
    pub rows: Option<usize>,
    pub experiment_start_time: Option<&'a str>,
    pub reason: &'a str,
}

impl<'a> IngestEvent<'a> {
    pub fn saved(saved: &'a SavedBatch) -> Self {
        Self {
            outcome: Outcome::Saved,
            status: 200,
            participant_id: Some(saved.metadata.participant_id.as_str()),
            filename: Some(saved.filename.as_str()),
            rows: Some(saved.rows),
            experiment_start_time: saved.metadata.experiment_start_time.as_deref(),
            reason: "data saved",
        }
    }

    /// `reason` is the internal error text; it never leaves the server.
    pub fn from_error(error: &'a IngestError, reason: &'a str) -> Self {
        Self {
            outcome: if error.is_client_error() {
                Outcome::Rejected
            } else {
                Outcome::Failed
            },
            status: error.status(),
            participant_id: error.participant_id(),
            filename: None,
            rows: None,
            experiment_start_time: None,
            reason,
        }
    }
}

/// Receives one event per POST or rejected request; preflight records nothing.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &IngestEvent<'_>);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &IngestEvent<'_>) {
        match event.outcome {
            Outcome::Saved => tracing::info!(
                outcome = event.outcome.as_str(),
                participant_id = event.participant_id.unwrap_or_default(),
                filename = event.filename.unwrap_or_default(),
                rows = event.rows.unwrap_or_default(),
                experiment_start_time = event.experiment_start_time,
                "saved trial data"
            ),
            Outcome::Rejected => tracing::warn!(
                outcome = event.outcome.as_str(),
                status = event.status,
                participant_id = event.participant_id,
                reason = event.reason,
                "rejected trial data request"
            ),
            Outcome::Failed => tracing::error!(
                outcome = event.outcome.as_str(),
                status = event.status,
                participant_id = event.participant_id,
                reason = event.reason,
                "failed to save trial data"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub outcome: Outcome,
    pub status: u16,
    pub participant_id: Option<String>,
    pub filename: Option<String>,
    pub rows: Option<usize>,
    pub experiment_start_time: Option<String>,
    pub reason: String,
}

impl From<&IngestEvent<'_>> for RecordedEvent {
    fn from(event: &IngestEvent<'_>) -> Self {
        Self {
            outcome: event.outcome,
            status: event.status,
            participant_id: event.participant_id.map(str::to_string),
            filename: event.filename.map(str::to_string),
            rows: event.rows,
            experiment_start_time: event.experiment_start_time.map(str::to_string),
            reason: event.reason.to_string(),
        }
    }
}

/// Keeps events in memory so tests can inspect what would have been logged.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &IngestEvent<'_>) {
        let mut guard = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(RecordedEvent::from(event));
    }
}

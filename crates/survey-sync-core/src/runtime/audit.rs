// crates/survey-sync-core/src/runtime/audit.rs
// ============================================================================
// Module: Survey Sync Audit Logging
// Description: Structured audit events for form installs and transmissions.
// Purpose: Emit JSON-line sync logs without binding to a logging backend.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every observable sync step (form install, transmission attempt, pass
//! summary) is recorded as a [`SyncAuditEvent`] through a [`SyncAuditSink`].
//! Sinks write one JSON object per line so deployments can route events to
//! their preferred log pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome label attached to audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Step succeeded.
    Ok,
    /// Step was skipped without error.
    Skipped,
    /// Step failed and will be retried later.
    Failed,
    /// Step failed permanently.
    Rejected,
}

/// Sync audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct SyncAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Step outcome.
    pub outcome: SyncOutcome,
    /// Form identifier when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    /// Form version when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_version: Option<String>,
    /// Survey instance identifier when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survey_instance_id: Option<String>,
    /// Transmission identifier when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transmission_id: Option<u64>,
    /// Artifact filename when relevant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Attempt number within the current pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Human-readable detail or error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Inputs required to construct a sync audit event.
#[derive(Debug, Clone, Default)]
pub struct SyncAuditEventParams {
    /// Form identifier when relevant.
    pub form_id: Option<String>,
    /// Form version when relevant.
    pub form_version: Option<String>,
    /// Survey instance identifier when relevant.
    pub survey_instance_id: Option<String>,
    /// Transmission identifier when relevant.
    pub transmission_id: Option<u64>,
    /// Artifact filename when relevant.
    pub filename: Option<String>,
    /// Attempt number within the current pass.
    pub attempt: Option<u32>,
    /// Detail or error message.
    pub message: Option<String>,
}

impl SyncAuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str, outcome: SyncOutcome, params: SyncAuditEventParams) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            outcome,
            form_id: params.form_id,
            form_version: params.form_version,
            survey_instance_id: params.survey_instance_id,
            transmission_id: params.transmission_id,
            filename: params.filename,
            attempt: params.attempt,
            message: params.message,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for sync events.
pub trait SyncAuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &SyncAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl SyncAuditSink for StderrAuditSink {
    fn record(&self, event: &SyncAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl SyncAuditSink for FileAuditSink {
    fn record(&self, event: &SyncAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl SyncAuditSink for NoopAuditSink {
    fn record(&self, _event: &SyncAuditEvent) {}
}

/// Audit sink that keeps events in memory, for tests and status reporting.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<SyncAuditEvent>>,
}

impl MemoryAuditSink {
    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<SyncAuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the names of the recorded events.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|events| events.iter().map(|event| event.event).collect())
            .unwrap_or_default()
    }
}

impl SyncAuditSink for MemoryAuditSink {
    fn record(&self, event: &SyncAuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileAuditSink::new(&path).unwrap();
        let params = SyncAuditEventParams {
            filename: Some("a.zip".to_string()),
            ..SyncAuditEventParams::default()
        };
        sink.record(&SyncAuditEvent::new("transmission_synced", SyncOutcome::Ok, params));
        sink.record(&SyncAuditEvent::new(
            "sync_pass_completed",
            SyncOutcome::Ok,
            SyncAuditEventParams::default(),
        ));
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "transmission_synced");
        assert_eq!(first["filename"], "a.zip");
        assert!(first.get("form_id").is_none());
    }
}

// crates/survey-sync-core/src/core/state.rs
// ============================================================================
// Module: Survey Sync Persisted State
// Description: Survey instance, transmission, and installed form records.
// Purpose: Capture the finite-state fields driven by submission and sync.
// Dependencies: crate::core::{form, hashing, identifiers, time, version}, serde
// ============================================================================

//! ## Overview
//! These records are what the persistence gateway stores. Two state machines
//! live here: the survey instance [`SubmissionStatus`] and the per-artifact
//! [`TransmissionStatus`]. Transition tables are explicit so every gateway
//! implementation enforces the same rules.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::form::Form;
use crate::core::form::FormHeader;
use crate::core::hashing::HashDigest;
use crate::core::identifiers::FormId;
use crate::core::identifiers::SurveyGroupId;
use crate::core::identifiers::SurveyInstanceId;
use crate::core::identifiers::TransmissionId;
use crate::core::time::Timestamp;
use crate::core::version::FormVersion;

// ============================================================================
// SECTION: Submission Status
// ============================================================================

/// Survey instance lifecycle status.
///
/// # Invariants
/// - Forward path: `Saved -> SubmitRequested -> Submitted -> Uploaded`.
/// - `Downloaded` and `Missing` are entry states for server-origin data.
/// - Backward moves are limited to failure handling: `Submitted` reverts to
///   `SubmitRequested`, and `Uploaded` reverts to `Submitted` when the server
///   reports the upload missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Draft saved on the device.
    Saved,
    /// User requested submission; export pending.
    SubmitRequested,
    /// Exported; transmissions enqueued.
    Submitted,
    /// Every transmission synced.
    Uploaded,
    /// Pulled from the server.
    Downloaded,
    /// Known to the server but absent locally.
    Missing,
}

impl SubmissionStatus {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Saved => "saved",
            Self::SubmitRequested => "submit_requested",
            Self::Submitted => "submitted",
            Self::Uploaded => "uploaded",
            Self::Downloaded => "downloaded",
            Self::Missing => "missing",
        }
    }

    /// Parses a canonical label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let status = match label {
            "saved" => Self::Saved,
            "submit_requested" => Self::SubmitRequested,
            "submitted" => Self::Submitted,
            "uploaded" => Self::Uploaded,
            "downloaded" => Self::Downloaded,
            "missing" => Self::Missing,
            _ => return None,
        };
        Some(status)
    }

    /// Returns true when `next` is an allowed transition from `self`.
    ///
    /// Re-entering the current state is always allowed so that retried
    /// commands stay idempotent.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Saved | Self::Downloaded | Self::Missing, Self::Saved | Self::SubmitRequested)
                | (Self::SubmitRequested | Self::Uploaded, Self::Submitted)
                | (Self::Submitted, Self::Uploaded | Self::SubmitRequested)
        )
    }

    /// Returns true while the instance may still be edited.
    #[must_use]
    pub const fn is_editable(self) -> bool {
        matches!(self, Self::Saved | Self::Downloaded | Self::Missing)
    }
}

// ============================================================================
// SECTION: Transmission Status
// ============================================================================

/// Per-artifact transmission status.
///
/// # Invariants
/// - `Synced` is reached only after upload and notify both succeed.
/// - `FormDeleted` and `Skipped` are terminal; the rows are kept for audit.
/// - `InProgress` rows left behind by an interrupted pass are pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionStatus {
    /// Waiting for its first attempt.
    Queued,
    /// Attempt started in the current or an interrupted pass.
    InProgress,
    /// Uploaded and announced to the server.
    Synced,
    /// Last attempt failed; eligible for retry.
    Failed,
    /// The owning form was deleted upstream; undeliverable.
    FormDeleted,
    /// The artifact kind is not transmittable; settled without an attempt.
    Skipped,
}

impl TransmissionStatus {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::FormDeleted => "form_deleted",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a canonical label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let status = match label {
            "queued" => Self::Queued,
            "in_progress" => Self::InProgress,
            "synced" => Self::Synced,
            "failed" => Self::Failed,
            "form_deleted" => Self::FormDeleted,
            "skipped" => Self::Skipped,
            _ => return None,
        };
        Some(status)
    }

    /// Returns true when the transmission still needs work.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Failed)
    }

    /// Returns true for statuses that no later pass or requeue revisits.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::FormDeleted | Self::Skipped)
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// Survey group holding one or more forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyGroup {
    /// Survey group identifier.
    pub id: SurveyGroupId,
    /// Display name.
    pub name: String,
    /// Whether the user has seen the latest form changes.
    pub viewed: bool,
}

/// Locally installed form row.
///
/// # Invariants
/// - `definition` is `None` when the archive could not be parsed; the row is
///   still installed so the version is known, with `help_downloaded = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledForm {
    /// Header the row was installed from.
    pub header: FormHeader,
    /// Parsed questionnaire, when available.
    pub definition: Option<Form>,
    /// Whether every referenced resource archive was installed.
    pub help_downloaded: bool,
    /// Whether the server reported the form deleted.
    pub deleted: bool,
    /// Install time.
    pub installed_at: Timestamp,
}

impl InstalledForm {
    /// Returns the form identifier.
    #[must_use]
    pub const fn id(&self) -> &FormId {
        &self.header.id
    }

    /// Returns the installed version.
    #[must_use]
    pub const fn version(&self) -> &FormVersion {
        &self.header.version
    }
}

/// Persisted survey instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyInstance {
    /// Instance identifier.
    pub id: SurveyInstanceId,
    /// Form the instance answers.
    pub form_id: FormId,
    /// Form version at creation.
    pub form_version: FormVersion,
    /// Lifecycle status.
    pub status: SubmissionStatus,
    /// Creation time.
    pub created_at: Timestamp,
    /// Time of the last submission request, if any.
    pub submitted_at: Option<Timestamp>,
    /// Time of the last status change.
    pub updated_at: Timestamp,
}

/// Persisted transmission row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionRecord {
    /// Row identifier; allocation order equals enqueue order.
    pub id: TransmissionId,
    /// Owning survey instance.
    pub survey_instance_id: SurveyInstanceId,
    /// Form of the owning instance.
    pub form_id: FormId,
    /// Artifact filename (unique per instance).
    pub filename: String,
    /// Current status.
    pub status: TransmissionStatus,
    /// Checksum of the last uploaded content, if any.
    pub checksum: Option<HashDigest>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Last failure message, if any.
    pub last_error: Option<String>,
    /// Enqueue time.
    pub created_at: Timestamp,
    /// Time of the last status change.
    pub updated_at: Timestamp,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

// crates/survey-sync-core/src/interfaces/mod.rs
// ============================================================================
// Module: Survey Sync Interfaces
// Description: Backend-agnostic seams for persistence, network, and local files.
// Purpose: Define the contracts the sync runtime drives without binding to a backend.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! The runtime never talks to SQLite, HTTP, S3, or the filesystem directly.
//! It drives these traits, which the store, remote, and CLI crates implement.
//! All traits are `Send + Sync` so a single instance can be shared by the
//! transmission worker pool.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ArtifactKind;
use crate::core::DeviceId;
use crate::core::FormHeader;
use crate::core::FormId;
use crate::core::FormVersion;
use crate::core::HashDigest;
use crate::core::InstalledForm;
use crate::core::NotifyAction;
use crate::core::QuestionResponse;
use crate::core::ResourceId;
use crate::core::ResponseKey;
use crate::core::SubmissionStatus;
use crate::core::SurveyGroup;
use crate::core::SurveyGroupId;
use crate::core::SurveyInstance;
use crate::core::SurveyInstanceId;
use crate::core::TransmissionId;
use crate::core::TransmissionRecord;
use crate::core::TransmissionStatus;

// ============================================================================
// SECTION: Persistence Gateway
// ============================================================================

/// Persistence gateway errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Storage I/O error.
    #[error("persistence io error: {0}")]
    Io(String),
    /// Stored data fails integrity checks.
    #[error("persistence corruption: {0}")]
    Corrupt(String),
    /// Stored schema version is incompatible.
    #[error("persistence version mismatch: {0}")]
    VersionMismatch(String),
    /// Input data is invalid.
    #[error("persistence invalid data: {0}")]
    Invalid(String),
    /// Referenced row does not exist.
    #[error("persistence record not found: {0}")]
    NotFound(String),
    /// Requested status change is not allowed.
    #[error("invalid status transition for {instance}: {from} -> {to}")]
    InvalidTransition {
        /// Instance identifier.
        instance: String,
        /// Current status label.
        from: &'static str,
        /// Requested status label.
        to: &'static str,
    },
    /// Responses can no longer change once a submission was requested.
    #[error("responses of {instance} are frozen in status {status}")]
    Frozen {
        /// Instance identifier.
        instance: String,
        /// Current status label.
        status: &'static str,
    },
    /// Backend reported an error.
    #[error("persistence error: {0}")]
    Store(String),
}

/// Durable, transactional storage for forms, instances, responses, and
/// transmissions.
///
/// # Invariants
/// - Every method is atomic: it either commits completely or has no effect.
/// - Transmission rows are unique per `(survey instance, filename)` and are
///   never deleted.
/// - Status changes go through [`SubmissionStatus::can_transition_to`].
/// - Responses change only while [`SubmissionStatus::is_editable`] holds.
pub trait PersistenceGateway: Send + Sync {
    /// Inserts or renames a survey group, preserving its viewed flag.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the write fails.
    fn upsert_survey_group(&self, id: &SurveyGroupId, name: &str) -> Result<(), GatewayError>;

    /// Loads a survey group.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn survey_group(&self, id: &SurveyGroupId) -> Result<Option<SurveyGroup>, GatewayError>;

    /// Sets a survey group's viewed flag.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] when the group does not exist.
    fn set_survey_group_viewed(&self, id: &SurveyGroupId, viewed: bool)
    -> Result<(), GatewayError>;

    /// Installs a form, fully replacing any previous version of the same id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the write fails.
    fn install_form(&self, form: &InstalledForm) -> Result<(), GatewayError>;

    /// Loads an installed form.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails or the row is corrupt.
    fn form(&self, id: &FormId) -> Result<Option<InstalledForm>, GatewayError>;

    /// Returns the installed version of a form, if any.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn form_version(&self, id: &FormId) -> Result<Option<FormVersion>, GatewayError> {
        Ok(self.form(id)?.map(|form| form.header.version))
    }

    /// Lists installed form ids (deleted forms included) in id order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn form_ids(&self) -> Result<Vec<FormId>, GatewayError>;

    /// Flags a form as deleted upstream. Returns false when it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the write fails.
    fn mark_form_deleted(&self, id: &FormId) -> Result<bool, GatewayError>;

    /// Physically removes a form row.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the write fails.
    fn delete_form(&self, id: &FormId) -> Result<(), GatewayError>;

    /// Creates a survey instance.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Invalid`] when the id already exists.
    fn create_instance(&self, instance: &SurveyInstance) -> Result<(), GatewayError>;

    /// Loads a survey instance.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn instance(&self, id: &SurveyInstanceId) -> Result<Option<SurveyInstance>, GatewayError>;

    /// Lists instances in a given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn instances_with_status(
        &self,
        status: SubmissionStatus,
    ) -> Result<Vec<SurveyInstance>, GatewayError>;

    /// Moves an instance to a new status.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidTransition`] when the move is not allowed.
    fn set_instance_status(
        &self,
        id: &SurveyInstanceId,
        status: SubmissionStatus,
    ) -> Result<SurveyInstance, GatewayError>;

    /// Upserts a response by `(instance, question, iteration)`, returning it
    /// with its row identity.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Frozen`] once the instance left an editable
    /// status, or another [`GatewayError`] when the write fails.
    fn save_response(&self, response: &QuestionResponse) -> Result<QuestionResponse, GatewayError>;

    /// Deletes a response. Returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Frozen`] once the instance left an editable
    /// status, or another [`GatewayError`] when the write fails.
    fn delete_response(
        &self,
        instance: &SurveyInstanceId,
        key: &ResponseKey,
    ) -> Result<bool, GatewayError>;

    /// Loads every response of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn responses(&self, instance: &SurveyInstanceId)
    -> Result<Vec<QuestionResponse>, GatewayError>;

    /// Replaces the instance's stored responses with the final set and moves
    /// the instance to [`SubmissionStatus::SubmitRequested`] in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Frozen`] when a submission was already
    /// requested, or another [`GatewayError`] when the write fails.
    fn commit_submission(
        &self,
        instance: &SurveyInstanceId,
        responses: &[QuestionResponse],
    ) -> Result<SurveyInstance, GatewayError>;

    /// Enqueues a transmission, returning the existing row when the
    /// `(instance, filename)` pair is already known.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] when the instance does not exist.
    fn enqueue_transmission(
        &self,
        instance: &SurveyInstanceId,
        filename: &str,
    ) -> Result<TransmissionRecord, GatewayError>;

    /// Enqueues every artifact of an export and moves the instance to
    /// [`SubmissionStatus::Submitted`] in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the transition is invalid or the write fails.
    fn commit_export(
        &self,
        instance: &SurveyInstanceId,
        filenames: &[String],
    ) -> Result<Vec<TransmissionRecord>, GatewayError>;

    /// Lists transmissions of an instance in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn transmissions_for_instance(
        &self,
        instance: &SurveyInstanceId,
    ) -> Result<Vec<TransmissionRecord>, GatewayError>;

    /// Lists pending transmissions (queued, in progress, failed) in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn pending_transmissions(&self) -> Result<Vec<TransmissionRecord>, GatewayError>;

    /// Updates a transmission status. Entering
    /// [`TransmissionStatus::InProgress`] counts an attempt.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] when the row does not exist.
    fn update_transmission(
        &self,
        id: TransmissionId,
        status: TransmissionStatus,
        checksum: Option<&HashDigest>,
        error: Option<&str>,
    ) -> Result<TransmissionRecord, GatewayError>;

    /// Re-queues every transmission of `filename` and reverts its uploaded
    /// instance to [`SubmissionStatus::Submitted`]. Returns the touched rows.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the write fails.
    fn requeue_missing_file(&self, filename: &str)
    -> Result<Vec<TransmissionRecord>, GatewayError>;

    /// Counts pending transmissions referencing a form.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the read fails.
    fn pending_transmission_count(&self, form: &FormId) -> Result<usize, GatewayError>;

    /// Reports store readiness.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Network
// ============================================================================

/// Network errors, classified for retry and reconciliation.
///
/// # Invariants
/// - Only [`NetworkError::Transient`] is retried within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Connectivity loss, timeout, or server-side failure.
    #[error("transient network error: {0}")]
    Transient(String),
    /// The addressed resource does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),
    /// The device lacks a dashboard assignment.
    #[error("dashboard assignment missing: {0}")]
    AssignmentRequired(String),
    /// The server rejected the request.
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Server message.
        message: String,
    },
    /// The response could not be decoded or the request could not be built.
    #[error("invalid network payload: {0}")]
    Invalid(String),
}

impl NetworkError {
    /// Returns true when a retry may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Server reconciliation result for locally known forms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingFiles {
    /// Filenames the server expected but never received.
    pub missing_files: Vec<String>,
    /// Form ids deleted upstream.
    pub deleted_forms: Vec<FormId>,
}

/// REST endpoint for form distribution and upload notifications.
pub trait FormServer: Send + Sync {
    /// Fetches the header of one form.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the call fails.
    fn fetch_form_header(
        &self,
        form_id: &FormId,
        device_id: &DeviceId,
    ) -> Result<FormHeader, NetworkError>;

    /// Fetches the headers of every form assigned to the device.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the call fails.
    fn fetch_form_headers(&self, device_id: &DeviceId) -> Result<Vec<FormHeader>, NetworkError>;

    /// Downloads a form definition archive.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the call fails.
    fn download_form_archive(&self, form_id: &FormId) -> Result<Vec<u8>, NetworkError>;

    /// Downloads a resource archive.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the call fails.
    fn download_resource_archive(&self, resource_id: &ResourceId) -> Result<Vec<u8>, NetworkError>;

    /// Announces an uploaded artifact.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the call fails.
    fn notify_file_available(
        &self,
        action: NotifyAction,
        form_id: &FormId,
        filename: &str,
        device_id: &DeviceId,
    ) -> Result<(), NetworkError>;

    /// Asks the server which files it is missing and which forms are gone.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the call fails.
    fn fetch_pending_files(
        &self,
        form_ids: &[FormId],
        device_id: &DeviceId,
    ) -> Result<PendingFiles, NetworkError>;
}

/// Upload acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadAck {
    /// True when an object with the same checksum was already stored.
    pub already_present: bool,
}

/// Object storage for artifacts, content-addressed by checksum.
///
/// # Invariants
/// - Uploading unchanged content to the same key is a no-op.
pub trait ArtifactStore: Send + Sync {
    /// Uploads an artifact under its destination key.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the upload fails.
    fn upload_artifact(
        &self,
        destination_key: &str,
        bytes: &[u8],
        checksum: &HashDigest,
        content_type: &str,
        public: bool,
    ) -> Result<UploadAck, NetworkError>;
}

// ============================================================================
// SECTION: Local Files
// ============================================================================

/// Local file errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileStoreError {
    /// The file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),
    /// The filename or archive entry is invalid.
    #[error("invalid file: {0}")]
    Invalid(String),
    /// The device ran out of space while writing.
    #[error("storage full: {0}")]
    StorageFull(String),
    /// Other I/O failure.
    #[error("file io error: {0}")]
    Io(String),
}

/// Device-local artifact and resource files.
pub trait FileStore: Send + Sync {
    /// Reads an artifact by filename from the directory of its kind.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::NotFound`] when the file is absent.
    fn read_artifact(&self, kind: ArtifactKind, filename: &str) -> Result<Vec<u8>, FileStoreError>;

    /// Returns true when an artifact file exists.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError`] when the lookup fails.
    fn artifact_exists(&self, kind: ArtifactKind, filename: &str) -> Result<bool, FileStoreError>;

    /// Atomically writes a submitted-data archive.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError`] when the write fails.
    fn write_data_archive(&self, filename: &str, bytes: &[u8]) -> Result<(), FileStoreError>;

    /// Extracts a resource archive into the resource directory.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Invalid`] when an entry escapes the directory.
    fn install_resource(&self, resource: &ResourceId, archive: &[u8])
    -> Result<(), FileStoreError>;
}

/// Free-space probe for the artifact volume.
pub trait StorageProbe: Send + Sync {
    /// Returns the bytes available to the application.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError`] when the probe fails.
    fn available_bytes(&self) -> Result<u64, FileStoreError>;
}

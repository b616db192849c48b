// crates/survey-sync-core/src/runtime/submission.rs
// ============================================================================
// Module: Survey Sync Submission
// Description: Submission requests and export of response sets into artifacts.
// Purpose: Commit submitted state durably before any network operation.
// Dependencies: crate::{core, interfaces, runtime}, serde, serde_json
// ============================================================================

//! ## Overview
//! Submitting an instance happens in two committed steps:
//! 1. the final responses and `SubmitRequested` are persisted together;
//! 2. the exportable responses are packaged into `<instanceId>.zip`
//!    (holding `data.json`), written to the data directory, and the archive
//!    plus every referenced media file are enqueued while the instance moves
//!    to `Submitted`.
//!
//! The second step is also what export retry re-runs for instances left in
//! `SubmitRequested`. Enqueue is idempotent, so re-exporting never duplicates
//! transmission rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::core::ArtifactKind;
use crate::core::DeviceId;
use crate::core::FormId;
use crate::core::QuestionResponse;
use crate::core::SubmissionStatus;
use crate::core::SurveyInstance;
use crate::core::SurveyInstanceId;
use crate::core::Timestamp;
use crate::core::TransmissionRecord;
use crate::core::artifact::is_plain_filename;
use crate::interfaces::FileStore;
use crate::interfaces::FileStoreError;
use crate::interfaces::GatewayError;
use crate::interfaces::PersistenceGateway;
use crate::runtime::archive;
use crate::runtime::archive::ArchiveError;
use crate::runtime::audit::SyncAuditEvent;
use crate::runtime::audit::SyncAuditEventParams;
use crate::runtime::audit::SyncAuditSink;
use crate::runtime::audit::SyncOutcome;
use crate::runtime::responses::ResponseStore;
use crate::runtime::responses::ValidationError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the JSON document inside a submitted-data archive.
pub const DATA_ENTRY: &str = "data.json";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Submission and export errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The response set is not submittable.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Persistence failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Writing the archive failed.
    #[error(transparent)]
    Files(#[from] FileStoreError),
    /// Packaging failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// The instance or its form cannot be exported.
    #[error("cannot export survey instance {instance}: {reason}")]
    NotExportable {
        /// Instance identifier.
        instance: SurveyInstanceId,
        /// Reason label.
        reason: String,
    },
}

// ============================================================================
// SECTION: Packaging
// ============================================================================

/// One exported answer inside `data.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedResponse<'a> {
    /// Template question identifier.
    question_id: &'a str,
    /// Raw iteration (`-1` outside repeatable groups).
    iteration: i64,
    /// Encoded response key.
    response_key: String,
    /// String-encoded answer.
    value: &'a str,
    /// Response type label.
    #[serde(rename = "type")]
    response_type: &'static str,
    /// Media filename, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
}

/// Top-level `data.json` document.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionDocument<'a> {
    /// Form identifier.
    form_id: &'a str,
    /// Form version answered.
    form_version: String,
    /// Survey instance identifier.
    survey_instance_id: &'a str,
    /// Submitting device.
    device_id: &'a str,
    /// Submission time (milliseconds since epoch).
    submitted_at: i64,
    /// Exported answers.
    responses: Vec<ExportedResponse<'a>>,
}

/// Packaged submission ready to be written and enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPackage {
    /// Archive filename, `<instanceId>.zip`.
    pub filename: String,
    /// Archive bytes.
    pub bytes: Vec<u8>,
    /// Media filenames referenced by exported answers.
    pub media: Vec<String>,
}

impl SubmissionPackage {
    /// Returns every filename to enqueue, archive first.
    #[must_use]
    pub fn filenames(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.media.len() + 1);
        names.push(self.filename.clone());
        names.extend(self.media.iter().cloned());
        names
    }
}

/// Returns the archive filename for an instance.
#[must_use]
pub fn archive_filename(instance: &SurveyInstanceId) -> String {
    format!("{instance}.zip")
}

/// Packages the exportable answers of a store into a data archive.
///
/// # Errors
///
/// Returns [`SubmissionError`] when the instance id is not a plain filename
/// or encoding fails.
pub fn package_submission(
    store: &ResponseStore,
    device_id: &DeviceId,
    submitted_at: Timestamp,
) -> Result<SubmissionPackage, SubmissionError> {
    let filename = archive_filename(store.instance_id());
    if !is_plain_filename(&filename) {
        return Err(SubmissionError::NotExportable {
            instance: store.instance_id().clone(),
            reason: "instance id is not a plain filename".to_string(),
        });
    }
    let exportable = store.exportable();
    let document = SubmissionDocument {
        form_id: store.form().id().as_str(),
        form_version: store.form().version().to_string(),
        survey_instance_id: store.instance_id().as_str(),
        device_id: device_id.as_str(),
        submitted_at: submitted_at.as_unix_millis(),
        responses: exportable.iter().map(|response| export_response(response)).collect(),
    };
    let json = serde_json::to_vec(&document)
        .map_err(|err| ArchiveError::Invalid(format!("data.json encoding failed: {err}")))?;
    let bytes = archive::build(&[(DATA_ENTRY, json.as_slice())])?;
    Ok(SubmissionPackage {
        filename,
        bytes,
        media: store.media_filenames(),
    })
}

/// Converts a response into its exported shape.
fn export_response(response: &QuestionResponse) -> ExportedResponse<'_> {
    ExportedResponse {
        question_id: response.question_id.as_str(),
        iteration: response.iteration.get(),
        response_key: response.response_key(),
        value: &response.value,
        response_type: response.response_type.as_str(),
        filename: response.filename.as_deref(),
    }
}

// ============================================================================
// SECTION: Submission Service
// ============================================================================

/// Result of re-exporting pending submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Instances exported and moved to `Submitted`.
    pub exported: Vec<SurveyInstanceId>,
    /// Instances left in `SubmitRequested` because their form is deleted.
    pub skipped: Vec<SurveyInstanceId>,
    /// Instances whose export failed.
    pub failed: Vec<(SurveyInstanceId, SubmissionError)>,
}

/// Submission requests, export, and export retry.
pub struct SubmissionService {
    /// Persistence gateway.
    gateway: Arc<dyn PersistenceGateway>,
    /// Local artifact files.
    files: Arc<dyn FileStore>,
    /// Audit sink.
    audit: Arc<dyn SyncAuditSink>,
    /// Device identity written into archives.
    device_id: DeviceId,
}

impl SubmissionService {
    /// Creates a submission service.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        files: Arc<dyn FileStore>,
        audit: Arc<dyn SyncAuditSink>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            gateway,
            files,
            audit,
            device_id,
        }
    }

    /// Submits a completed response set and exports it.
    ///
    /// `SubmitRequested` is committed with the responses before packaging, so
    /// an export failure leaves the instance eligible for export retry.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::Validation`] when the set is not submittable,
    /// or another [`SubmissionError`] when persistence or export fails.
    pub fn request_submission(
        &self,
        store: &ResponseStore,
    ) -> Result<Vec<TransmissionRecord>, SubmissionError> {
        if let Some(blocker) = store.submission_blocker() {
            return Err(blocker.into());
        }
        let responses: Vec<QuestionResponse> = store.responses().cloned().collect();
        let instance = self.gateway.commit_submission(store.instance_id(), &responses)?;
        self.export(store, instance.submitted_at.unwrap_or(instance.updated_at))
    }

    /// Packages, writes, and enqueues a response set, moving the instance to
    /// `Submitted`.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError`] when packaging, writing, or enqueueing fails.
    pub fn export(
        &self,
        store: &ResponseStore,
        submitted_at: Timestamp,
    ) -> Result<Vec<TransmissionRecord>, SubmissionError> {
        let package = package_submission(store, &self.device_id, submitted_at)?;
        let mut filenames = vec![package.filename.clone()];
        for media in &package.media {
            if ArtifactKind::classify(media).is_some() && is_plain_filename(media) {
                filenames.push(media.clone());
            } else {
                self.emit("artifact_skipped", SyncOutcome::Skipped, store.instance_id(), media);
            }
        }
        self.files.write_data_archive(&package.filename, &package.bytes)?;
        let records = self.gateway.commit_export(store.instance_id(), &filenames)?;
        self.emit("instance_exported", SyncOutcome::Ok, store.instance_id(), &package.filename);
        Ok(records)
    }

    /// Rebuilds the response store of a persisted instance.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError::NotExportable`] when the form is missing,
    /// deleted, or has no parsed definition.
    pub fn load_store(&self, instance: &SurveyInstance) -> Result<ResponseStore, SubmissionError> {
        let not_exportable = |reason: &str| SubmissionError::NotExportable {
            instance: instance.id.clone(),
            reason: reason.to_string(),
        };
        let form = self
            .gateway
            .form(&instance.form_id)?
            .ok_or_else(|| not_exportable("form is not installed"))?;
        if form.deleted {
            return Err(not_exportable("form was deleted upstream"));
        }
        let definition = form.definition.ok_or_else(|| not_exportable("form has no definition"))?;
        let responses = self.gateway.responses(&instance.id)?;
        Ok(ResponseStore::from_responses(Arc::new(definition), instance.id.clone(), responses)?)
    }

    /// Re-exports every `SubmitRequested` instance whose form is not deleted.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when listing fails; per-instance failures are
    /// reported in the [`ExportReport`].
    pub fn export_pending(&self) -> Result<ExportReport, GatewayError> {
        let mut report = ExportReport::default();
        for instance in self.gateway.instances_with_status(SubmissionStatus::SubmitRequested)? {
            if self.form_deleted(&instance.form_id)? {
                report.skipped.push(instance.id);
                continue;
            }
            let submitted_at = instance.submitted_at.unwrap_or(instance.updated_at);
            let result =
                self.load_store(&instance).and_then(|store| self.export(&store, submitted_at));
            match result {
                Ok(_) => report.exported.push(instance.id),
                Err(err) => {
                    self.audit.record(&SyncAuditEvent::new(
                        "instance_export_failed",
                        SyncOutcome::Failed,
                        SyncAuditEventParams {
                            form_id: Some(instance.form_id.to_string()),
                            survey_instance_id: Some(instance.id.to_string()),
                            message: Some(err.to_string()),
                            ..SyncAuditEventParams::default()
                        },
                    ));
                    report.failed.push((instance.id, err));
                }
            }
        }
        Ok(report)
    }

    /// Reverts `Submitted` instances whose pending archive is missing on disk.
    ///
    /// # Errors
    ///
    /// Returns [`SubmissionError`] when a lookup or transition fails.
    pub fn check_submitted_files(&self) -> Result<Vec<SurveyInstanceId>, SubmissionError> {
        let mut reverted = Vec::new();
        for instance in self.gateway.instances_with_status(SubmissionStatus::Submitted)? {
            let filename = archive_filename(&instance.id);
            let pending = self
                .gateway
                .transmissions_for_instance(&instance.id)?
                .iter()
                .any(|record| record.filename == filename && record.status.is_pending());
            if !pending || self.files.artifact_exists(ArtifactKind::DataArchive, &filename)? {
                continue;
            }
            self.gateway.set_instance_status(&instance.id, SubmissionStatus::SubmitRequested)?;
            self.emit("instance_archive_missing", SyncOutcome::Failed, &instance.id, &filename);
            reverted.push(instance.id);
        }
        Ok(reverted)
    }

    /// Returns true when a form is known and flagged deleted.
    fn form_deleted(&self, form_id: &FormId) -> Result<bool, GatewayError> {
        Ok(self.gateway.form(form_id)?.is_some_and(|form| form.deleted))
    }

    /// Records an instance-scoped audit event.
    fn emit(
        &self,
        event: &'static str,
        outcome: SyncOutcome,
        instance: &SurveyInstanceId,
        filename: &str,
    ) {
        self.audit.record(&SyncAuditEvent::new(
            event,
            outcome,
            SyncAuditEventParams {
                survey_instance_id: Some(instance.to_string()),
                filename: Some(filename.to_string()),
                ..SyncAuditEventParams::default()
            },
        ));
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

// crates/survey-sync-core/src/runtime/transmission.rs
// ============================================================================
// Module: Survey Sync Transmission Pipeline
// Description: Upload and announcement of submitted artifacts.
// Purpose: Drive each transmission through resolve, upload, notify, and apply.
// Dependencies: crate::{core, interfaces, runtime}, thiserror
// ============================================================================

//! ## Overview
//! A sync pass runs these stages in order:
//! 1. storage check (no network before it);
//! 2. server reconciliation of missing files and deleted forms;
//! 3. the submitted-file check and export retry;
//! 4. pending transmissions grouped by instance and drained by a scoped
//!    worker pool, each instance processed sequentially in enqueue order;
//! 5. apply: an instance becomes `Uploaded` only when every transmission it
//!    owns is `Synced`.
//!
//! Workers pull instances from a shared queue and send per-instance results
//! back over a channel. A transmission is marked `Synced` only after both the
//! upload and the notify succeed. Uploads are content-addressed, so a pass
//! interrupted between the two re-uploads nothing and only re-notifies.
//!
//! Only [`SyncError::AssignmentRequired`] and
//! [`SyncError::StorageExhausted`] interrupt a pass.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::core::ArtifactKind;
use crate::core::DeviceId;
use crate::core::FormId;
use crate::core::ResolvedArtifact;
use crate::core::SubmissionStatus;
use crate::core::SurveyInstanceId;
use crate::core::TransmissionRecord;
use crate::core::TransmissionStatus;
use crate::interfaces::ArtifactStore;
use crate::interfaces::FileStore;
use crate::interfaces::FileStoreError;
use crate::interfaces::FormServer;
use crate::interfaces::GatewayError;
use crate::interfaces::NetworkError;
use crate::interfaces::PersistenceGateway;
use crate::interfaces::StorageProbe;
use crate::runtime::audit::SyncAuditEvent;
use crate::runtime::audit::SyncAuditEventParams;
use crate::runtime::audit::SyncAuditSink;
use crate::runtime::audit::SyncOutcome;
use crate::runtime::submission::SubmissionError;
use crate::runtime::submission::SubmissionService;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default free-space threshold (100 MB).
pub const DEFAULT_MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

/// Per-call retry budget with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub attempts: u32,
    /// Backoff unit; the n-th retry waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Runs `call`, retrying transient failures within the budget.
    ///
    /// # Errors
    ///
    /// Returns the last error once the budget is spent, or the first
    /// non-transient error.
    pub fn run<T>(
        &self,
        mut call: impl FnMut() -> Result<T, NetworkError>,
    ) -> Result<T, NetworkError> {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    thread::sleep(self.backoff.saturating_mul(attempt));
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Number of instances processed concurrently.
    pub workers: usize,
    /// Per-call retry policy.
    pub retry: RetryPolicy,
    /// Minimum free bytes required to start a pass.
    pub min_free_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            retry: RetryPolicy::default(),
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
        }
    }
}

// ============================================================================
// SECTION: Errors & Summary
// ============================================================================

/// Errors that interrupt a sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The server rejected the device (HTTP 403); never silently retried.
    #[error("device assignment required: {0}")]
    AssignmentRequired(String),
    /// Free space is below the configured threshold.
    #[error("storage exhausted: {available} bytes available, {required} required")]
    StorageExhausted {
        /// Bytes available.
        available: u64,
        /// Configured threshold.
        required: u64,
    },
    /// The free-space probe failed.
    #[error(transparent)]
    Probe(#[from] FileStoreError),
    /// Persistence failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The submitted-file check failed.
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// Result of one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Instances that reached `Uploaded`.
    pub instances_uploaded: Vec<SurveyInstanceId>,
    /// Instances with at least one failed transmission.
    pub instances_failed: Vec<SurveyInstanceId>,
    /// Instances reverted because their form was deleted upstream.
    pub instances_form_deleted: Vec<SurveyInstanceId>,
    /// Transmissions marked `Synced`.
    pub artifacts_synced: usize,
    /// Transmissions marked `Failed`.
    pub artifacts_failed: usize,
    /// Transmissions skipped because their kind is unknown.
    pub artifacts_skipped: usize,
    /// Forms recorded as deleted during the pass.
    pub deleted_forms: Vec<FormId>,
    /// Instances re-exported from `SubmitRequested`.
    pub exported: usize,
    /// Transmissions re-queued because the server reported them missing.
    pub requeued: usize,
}

// ============================================================================
// SECTION: Worker Results
// ============================================================================

/// Pending transmissions of one instance, in enqueue order.
#[derive(Debug, Clone)]
struct InstanceJob {
    /// Owning instance.
    instance: SurveyInstanceId,
    /// Owning form.
    form_id: FormId,
    /// Pending rows in enqueue order.
    records: Vec<TransmissionRecord>,
}

/// Terminal outcome of one transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactOutcome {
    /// Uploaded and announced.
    Synced,
    /// Failed; eligible for retry next pass.
    Failed,
    /// Skipped because the kind is unknown.
    Skipped,
    /// The form is gone upstream.
    FormDeleted,
    /// The device is no longer assigned; the pass stops.
    AssignmentRequired(String),
}

/// Per-instance worker result.
#[derive(Debug, Clone)]
struct InstanceResult {
    /// Owning instance.
    instance: SurveyInstanceId,
    /// Owning form.
    form_id: FormId,
    /// Counted outcomes in processing order.
    outcomes: Vec<ArtifactOutcome>,
    /// Persistence error that stopped the instance, if any.
    gateway_error: Option<GatewayError>,
}

impl InstanceResult {
    /// Returns true when the form was reported deleted.
    fn form_deleted(&self) -> bool {
        self.outcomes.contains(&ArtifactOutcome::FormDeleted)
    }

    /// Returns the assignment message when the pass must stop.
    fn assignment_required(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|outcome| match outcome {
            ArtifactOutcome::AssignmentRequired(message) => Some(message.as_str()),
            _ => None,
        })
    }

    /// Counts outcomes equal to `target`.
    fn count(&self, target: &ArtifactOutcome) -> usize {
        self.outcomes.iter().filter(|outcome| *outcome == target).count()
    }
}

/// Failure of one artifact stage.
#[derive(Debug)]
enum StageError {
    /// Local file could not be read.
    Local(FileStoreError),
    /// Network call failed.
    Network(NetworkError),
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Shared services used by the pipeline.
#[derive(Clone)]
pub struct PipelineServices {
    /// Persistence gateway.
    pub gateway: Arc<dyn PersistenceGateway>,
    /// Form server used for notify and reconciliation.
    pub server: Arc<dyn FormServer>,
    /// Object storage for artifacts.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Local artifact files.
    pub files: Arc<dyn FileStore>,
    /// Free-space probe.
    pub probe: Arc<dyn StorageProbe>,
    /// Audit sink.
    pub audit: Arc<dyn SyncAuditSink>,
    /// Device identity.
    pub device_id: DeviceId,
}

/// Transmission pipeline.
pub struct TransmissionPipeline {
    /// Shared services.
    services: PipelineServices,
    /// Export and export retry.
    submissions: SubmissionService,
    /// Tuning.
    config: PipelineConfig,
}

impl TransmissionPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(services: PipelineServices, config: PipelineConfig) -> Self {
        let submissions = SubmissionService::new(
            Arc::clone(&services.gateway),
            Arc::clone(&services.files),
            Arc::clone(&services.audit),
            services.device_id.clone(),
        );
        Self {
            services,
            submissions,
            config,
        }
    }

    /// Returns the submission service sharing this pipeline's services.
    #[must_use]
    pub const fn submissions(&self) -> &SubmissionService {
        &self.submissions
    }

    /// Checks free space against the configured threshold.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StorageExhausted`] when space is below the
    /// threshold.
    pub fn check_storage(&self) -> Result<u64, SyncError> {
        let available = self.services.probe.available_bytes()?;
        if available < self.config.min_free_bytes {
            return Err(SyncError::StorageExhausted {
                available,
                required: self.config.min_free_bytes,
            });
        }
        Ok(available)
    }

    /// Runs one sync pass.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the pass is interrupted. Work finished
    /// before an interruption stays committed.
    pub fn run_pass(&self) -> Result<SyncSummary, SyncError> {
        let result = self.run_stages();
        match &result {
            Ok(summary) => self.emit_pass("pass_completed", SyncOutcome::Ok, summary, None),
            Err(err) => self.emit_pass(
                "pass_interrupted",
                SyncOutcome::Failed,
                &SyncSummary::default(),
                Some(err.to_string()),
            ),
        }
        result
    }

    /// Runs every stage of a pass.
    fn run_stages(&self) -> Result<SyncSummary, SyncError> {
        self.check_storage()?;
        let mut summary = SyncSummary::default();
        self.reconcile_pending_files(&mut summary)?;
        self.submissions.check_submitted_files()?;
        let exports = self.submissions.export_pending()?;
        summary.exported = exports.exported.len();

        let jobs = self.collect_jobs(&mut summary)?;
        let results = self.drain(jobs);
        let interruption = self.apply(results, &mut summary)?;
        self.sweep_uploaded(&mut summary)?;
        if let Some(message) = interruption {
            return Err(SyncError::AssignmentRequired(message));
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Applies the server's missing-file and deleted-form report.
    fn reconcile_pending_files(&self, summary: &mut SyncSummary) -> Result<(), SyncError> {
        let gateway = &self.services.gateway;
        let form_ids = gateway.form_ids()?;
        if form_ids.is_empty() {
            return Ok(());
        }
        let report = self.config.retry.run(|| {
            self.services.server.fetch_pending_files(&form_ids, &self.services.device_id)
        });
        let pending = match report {
            Ok(pending) => pending,
            Err(NetworkError::AssignmentRequired(message)) => {
                return Err(SyncError::AssignmentRequired(message));
            }
            Err(err) => {
                self.services.audit.record(&SyncAuditEvent::new(
                    "pending_files_failed",
                    SyncOutcome::Failed,
                    SyncAuditEventParams {
                        message: Some(err.to_string()),
                        ..SyncAuditEventParams::default()
                    },
                ));
                return Ok(());
            }
        };
        for filename in &pending.missing_files {
            summary.requeued += gateway.requeue_missing_file(filename)?.len();
        }
        for form_id in &pending.deleted_forms {
            self.record_deleted_form(form_id, summary)?;
        }
        Ok(())
    }

    /// Marks a form deleted and records it once in the summary.
    fn record_deleted_form(
        &self,
        form_id: &FormId,
        summary: &mut SyncSummary,
    ) -> Result<(), GatewayError> {
        if self.services.gateway.mark_form_deleted(form_id)? {
            self.services.audit.record(&SyncAuditEvent::new(
                "form_deleted",
                SyncOutcome::Ok,
                SyncAuditEventParams {
                    form_id: Some(form_id.to_string()),
                    ..SyncAuditEventParams::default()
                },
            ));
        }
        if !summary.deleted_forms.contains(form_id) {
            summary.deleted_forms.push(form_id.clone());
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Job Collection
    // ------------------------------------------------------------------------

    /// Groups pending transmissions by instance, settling rows of deleted
    /// forms without any network call.
    fn collect_jobs(&self, summary: &mut SyncSummary) -> Result<Vec<InstanceJob>, SyncError> {
        let gateway = &self.services.gateway;
        let mut order: Vec<SurveyInstanceId> = Vec::new();
        let mut grouped: BTreeMap<SurveyInstanceId, InstanceJob> = BTreeMap::new();
        for record in gateway.pending_transmissions()? {
            let job = grouped.entry(record.survey_instance_id.clone()).or_insert_with(|| {
                order.push(record.survey_instance_id.clone());
                InstanceJob {
                    instance: record.survey_instance_id.clone(),
                    form_id: record.form_id.clone(),
                    records: Vec::new(),
                }
            });
            job.records.push(record);
        }

        let mut deleted_cache: BTreeMap<FormId, bool> = BTreeMap::new();
        let mut jobs = Vec::with_capacity(order.len());
        for instance in order {
            let Some(job) = grouped.remove(&instance) else {
                continue;
            };
            let deleted = match deleted_cache.get(&job.form_id) {
                Some(deleted) => *deleted,
                None => {
                    let deleted = gateway.form(&job.form_id)?.is_some_and(|form| form.deleted);
                    deleted_cache.insert(job.form_id.clone(), deleted);
                    deleted
                }
            };
            if deleted {
                self.settle_deleted_form(&job, summary)?;
            } else {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Marks every pending row of a deleted form and reverts its instance.
    fn settle_deleted_form(
        &self,
        job: &InstanceJob,
        summary: &mut SyncSummary,
    ) -> Result<(), GatewayError> {
        for record in &job.records {
            self.services.gateway.update_transmission(
                record.id,
                TransmissionStatus::FormDeleted,
                None,
                Some("form deleted upstream"),
            )?;
        }
        self.revert_for_deleted_form(&job.instance, &job.form_id, summary)
    }

    /// Reverts a `Submitted` instance whose form was deleted.
    fn revert_for_deleted_form(
        &self,
        instance: &SurveyInstanceId,
        form_id: &FormId,
        summary: &mut SyncSummary,
    ) -> Result<(), GatewayError> {
        let gateway = &self.services.gateway;
        if let Some(current) = gateway.instance(instance)?
            && current.status == SubmissionStatus::Submitted
        {
            gateway.set_instance_status(instance, SubmissionStatus::SubmitRequested)?;
        }
        if !summary.instances_form_deleted.contains(instance) {
            summary.instances_form_deleted.push(instance.clone());
        }
        self.record_deleted_form(form_id, summary)
    }

    // ------------------------------------------------------------------------
    // Worker Pool
    // ------------------------------------------------------------------------

    /// Drains jobs on a scoped worker pool and collects results.
    fn drain(&self, jobs: Vec<InstanceJob>) -> Vec<InstanceResult> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let workers = self.config.workers.clamp(1, jobs.len());
        let queue = Mutex::new(jobs.into_iter().collect::<VecDeque<_>>());
        let interrupted = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0 .. workers {
                let tx = tx.clone();
                let queue = &queue;
                let interrupted = &interrupted;
                scope.spawn(move || {
                    loop {
                        if interrupted.load(Ordering::SeqCst) {
                            break;
                        }
                        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                        let Some(job) = next else {
                            break;
                        };
                        let result = self.process_instance(job);
                        if result.assignment_required().is_some() {
                            interrupted.store(true, Ordering::SeqCst);
                        }
                        if tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(tx);
        rx.into_iter().collect()
    }

    /// Processes one instance's transmissions sequentially.
    fn process_instance(&self, job: InstanceJob) -> InstanceResult {
        let mut result = InstanceResult {
            instance: job.instance,
            form_id: job.form_id,
            outcomes: Vec::with_capacity(job.records.len()),
            gateway_error: None,
        };
        let mut records = job.records.iter();
        for record in records.by_ref() {
            match self.process_record(record) {
                Ok(outcome) => {
                    let stop = matches!(
                        outcome,
                        ArtifactOutcome::FormDeleted | ArtifactOutcome::AssignmentRequired(_)
                    );
                    result.outcomes.push(outcome);
                    if stop {
                        break;
                    }
                }
                Err(err) => {
                    result.gateway_error = Some(err);
                    break;
                }
            }
        }
        if result.form_deleted() {
            for rest in records {
                if let Err(err) = self.services.gateway.update_transmission(
                    rest.id,
                    TransmissionStatus::FormDeleted,
                    None,
                    Some("form deleted upstream"),
                ) {
                    result.gateway_error = Some(err);
                }
            }
        }
        result
    }

    /// Drives one transmission through resolve, upload, and notify.
    fn process_record(&self, record: &TransmissionRecord) -> Result<ArtifactOutcome, GatewayError> {
        let gateway = &self.services.gateway;
        let Some(kind) = ArtifactKind::classify(&record.filename) else {
            let message = "unsupported artifact kind";
            let record = gateway.update_transmission(
                record.id,
                TransmissionStatus::Skipped,
                None,
                Some(message),
            )?;
            self.emit_artifact(
                "artifact_skipped",
                SyncOutcome::Skipped,
                &record,
                Some(message.to_string()),
            );
            return Ok(ArtifactOutcome::Skipped);
        };
        let record =
            gateway.update_transmission(record.id, TransmissionStatus::InProgress, None, None)?;
        match self.upload_and_notify(&record, kind) {
            Ok(artifact) => {
                gateway.update_transmission(
                    record.id,
                    TransmissionStatus::Synced,
                    Some(&artifact.checksum),
                    None,
                )?;
                self.emit_artifact("artifact_synced", SyncOutcome::Ok, &record, None);
                Ok(ArtifactOutcome::Synced)
            }
            Err(StageError::Network(NetworkError::NotFound(message))) => {
                gateway.update_transmission(
                    record.id,
                    TransmissionStatus::FormDeleted,
                    None,
                    Some(&message),
                )?;
                self.emit_artifact(
                    "artifact_form_deleted",
                    SyncOutcome::Rejected,
                    &record,
                    Some(message),
                );
                Ok(ArtifactOutcome::FormDeleted)
            }
            Err(StageError::Network(NetworkError::AssignmentRequired(message))) => {
                gateway.update_transmission(
                    record.id,
                    TransmissionStatus::Failed,
                    None,
                    Some(&message),
                )?;
                self.emit_artifact(
                    "artifact_failed",
                    SyncOutcome::Rejected,
                    &record,
                    Some(message.clone()),
                );
                Ok(ArtifactOutcome::AssignmentRequired(message))
            }
            Err(err) => {
                let message = match err {
                    StageError::Local(err) => err.to_string(),
                    StageError::Network(err) => err.to_string(),
                };
                gateway.update_transmission(
                    record.id,
                    TransmissionStatus::Failed,
                    None,
                    Some(&message),
                )?;
                self.emit_artifact("artifact_failed", SyncOutcome::Failed, &record, Some(message));
                Ok(ArtifactOutcome::Failed)
            }
        }
    }

    /// Resolves, uploads, and announces one artifact.
    fn upload_and_notify(
        &self,
        record: &TransmissionRecord,
        kind: ArtifactKind,
    ) -> Result<ResolvedArtifact, StageError> {
        let bytes =
            self.services.files.read_artifact(kind, &record.filename).map_err(StageError::Local)?;
        let artifact = ResolvedArtifact::new(&record.filename, kind, bytes);
        self.config
            .retry
            .run(|| {
                self.services.artifacts.upload_artifact(
                    &artifact.destination_key,
                    &artifact.bytes,
                    &artifact.checksum,
                    artifact.content_type(),
                    artifact.is_public(),
                )
            })
            .map_err(StageError::Network)?;
        self.config
            .retry
            .run(|| {
                self.services.server.notify_file_available(
                    kind.action(),
                    &record.form_id,
                    &record.filename,
                    &self.services.device_id,
                )
            })
            .map_err(StageError::Network)?;
        Ok(artifact)
    }

    // ------------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------------

    /// Folds worker results into the summary and instance statuses.
    ///
    /// Returns the assignment message when a worker hit a 403.
    fn apply(
        &self,
        results: Vec<InstanceResult>,
        summary: &mut SyncSummary,
    ) -> Result<Option<String>, SyncError> {
        let mut interruption = None;
        let mut failed: BTreeSet<SurveyInstanceId> = BTreeSet::new();
        for result in results {
            summary.artifacts_synced += result.count(&ArtifactOutcome::Synced);
            summary.artifacts_failed += result.count(&ArtifactOutcome::Failed);
            summary.artifacts_skipped += result.count(&ArtifactOutcome::Skipped);
            if let Some(message) = result.assignment_required() {
                summary.artifacts_failed += 1;
                if interruption.is_none() {
                    interruption = Some(message.to_string());
                }
                failed.insert(result.instance.clone());
            }
            if let Some(err) = &result.gateway_error {
                let message = Some(err.to_string());
                self.emit_instance("instance_store_failed", &result.instance, message);
                failed.insert(result.instance.clone());
            }
            if result.form_deleted() {
                self.revert_for_deleted_form(&result.instance, &result.form_id, summary)?;
            } else if result.count(&ArtifactOutcome::Failed) > 0 {
                failed.insert(result.instance.clone());
            }
        }
        summary.instances_failed.extend(failed);
        Ok(interruption)
    }

    /// Moves every `Submitted` instance whose rows are all synced to
    /// `Uploaded`. Skipped rows do not block the instance.
    fn sweep_uploaded(&self, summary: &mut SyncSummary) -> Result<(), GatewayError> {
        let gateway = &self.services.gateway;
        for instance in gateway.instances_with_status(SubmissionStatus::Submitted)? {
            let records = gateway.transmissions_for_instance(&instance.id)?;
            let known: Vec<&TransmissionRecord> = records
                .iter()
                .filter(|record| record.status != TransmissionStatus::Skipped)
                .collect();
            let complete = !known.is_empty()
                && known.iter().all(|record| record.status == TransmissionStatus::Synced);
            if complete {
                gateway.set_instance_status(&instance.id, SubmissionStatus::Uploaded)?;
                self.emit_instance("instance_uploaded", &instance.id, None);
                summary.instances_uploaded.push(instance.id);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Audit
    // ------------------------------------------------------------------------

    /// Records a transmission-scoped audit event.
    fn emit_artifact(
        &self,
        event: &'static str,
        outcome: SyncOutcome,
        record: &TransmissionRecord,
        message: Option<String>,
    ) {
        self.services.audit.record(&SyncAuditEvent::new(
            event,
            outcome,
            SyncAuditEventParams {
                form_id: Some(record.form_id.to_string()),
                survey_instance_id: Some(record.survey_instance_id.to_string()),
                transmission_id: Some(record.id.get()),
                filename: Some(record.filename.clone()),
                attempt: Some(record.attempts),
                message,
                ..SyncAuditEventParams::default()
            },
        ));
    }

    /// Records an instance-scoped audit event.
    fn emit_instance(
        &self,
        event: &'static str,
        instance: &SurveyInstanceId,
        message: Option<String>,
    ) {
        let outcome = if message.is_some() { SyncOutcome::Failed } else { SyncOutcome::Ok };
        self.services.audit.record(&SyncAuditEvent::new(
            event,
            outcome,
            SyncAuditEventParams {
                survey_instance_id: Some(instance.to_string()),
                message,
                ..SyncAuditEventParams::default()
            },
        ));
    }

    /// Records the pass summary.
    fn emit_pass(
        &self,
        event: &'static str,
        outcome: SyncOutcome,
        summary: &SyncSummary,
        message: Option<String>,
    ) {
        let message = message.unwrap_or_else(|| {
            format!(
                "uploaded={} failed={} form_deleted={} synced={} artifacts_failed={} skipped={}",
                summary.instances_uploaded.len(),
                summary.instances_failed.len(),
                summary.instances_form_deleted.len(),
                summary.artifacts_synced,
                summary.artifacts_failed,
                summary.artifacts_skipped,
            )
        });
        self.services.audit.record(&SyncAuditEvent::new(
            event,
            outcome,
            SyncAuditEventParams {
                message: Some(message),
                ..SyncAuditEventParams::default()
            },
        ));
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::sync::atomic::AtomicU32;

    use super::*;

    #[test]
    fn retry_stops_on_non_transient_errors() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), NetworkError> = policy.run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(NetworkError::AssignmentRequired("403".to_string()))
        });
        assert!(matches!(result, Err(NetworkError::AssignmentRequired(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_spends_the_budget_on_transient_errors() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::ZERO,
        };
        let calls = AtomicU32::new(0);
        let result = policy.run(|| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            if call < 2 { Err(NetworkError::Transient("timeout".to_string())) } else { Ok(call) }
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

// crates/survey-sync-core/tests/transmission.rs
// ============================================================================
// Module: Transmission Pipeline Tests
// Description: End-to-end sync passes over scripted network doubles.
// ============================================================================
//! ## Overview
//! Drives submission and sync passes against an in-memory gateway, temp-dir
//! files, a scripted form server, and a content-addressed artifact store.

#![allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::use_debug,
    reason = "Tests use unwrap and panic-based assertions on deterministic fixtures."
)]

mod common;

use common::Harness;
use survey_sync_core::FormId;
use survey_sync_core::GatewayError;
use survey_sync_core::Iteration;
use survey_sync_core::NetworkError;
use survey_sync_core::PersistenceGateway;
use survey_sync_core::QuestionId;
use survey_sync_core::ResponseKey;
use survey_sync_core::SubmissionStatus;
use survey_sync_core::SurveyInstanceId;
use survey_sync_core::SyncError;
use survey_sync_core::TransmissionRecord;
use survey_sync_core::TransmissionStatus;
use survey_sync_core::ValidationError;
use survey_sync_core::runtime::SubmissionError;

const ENOUGH: u64 = 500 * 1024 * 1024;

fn status_of(harness: &Harness, instance: &str) -> SubmissionStatus {
    harness.gateway.instance(&SurveyInstanceId::new(instance)).unwrap().unwrap().status
}

fn rows(harness: &Harness, instance: &str) -> Vec<TransmissionRecord> {
    harness.gateway.transmissions_for_instance(&SurveyInstanceId::new(instance)).unwrap()
}

fn row<'a>(rows: &'a [TransmissionRecord], filename: &str) -> &'a TransmissionRecord {
    rows.iter().find(|record| record.filename == filename).unwrap()
}

#[test]
fn submission_commits_before_any_network_call() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &["a.jpg"]);
    let pipeline = harness.pipeline(ENOUGH);

    let records = pipeline.submissions().request_submission(&store).unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Submitted);
    assert!(harness.files.data_dir().join("uuid-1.zip").exists());
    assert!(harness.server.notified_files().is_empty());
    assert_eq!(harness.artifacts.write_count(), 0);
}

#[test]
fn uploaded_responses_cannot_be_edited_or_removed() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    pipeline.run_pass().unwrap();
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);

    let id = SurveyInstanceId::new("uuid-1");
    let mut edited = store.get(&QuestionId::new("name"), Iteration::NONE).unwrap().clone();
    edited.value = "Well 8".to_string();
    let edit = harness.gateway.save_response(&edited).unwrap_err();
    let key = ResponseKey::new(QuestionId::new("name"), Iteration::NONE);
    let removal = harness.gateway.delete_response(&id, &key).unwrap_err();

    assert!(matches!(edit, GatewayError::Frozen { status: "uploaded", .. }));
    assert!(matches!(removal, GatewayError::Frozen { .. }));
    assert_eq!(harness.gateway.responses(&id).unwrap()[0].value, "Well 7");
}

#[test]
fn missing_mandatory_answer_blocks_submission() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let mut store = harness.answered_instance(&form, "uuid-1", &[]);
    let removed = store.remove(&QuestionId::new("name"), Iteration::NONE);
    assert!(removed.is_some());
    let pipeline = harness.pipeline(ENOUGH);

    let err = pipeline.submissions().request_submission(&store).unwrap_err();

    assert!(matches!(
        err,
        SubmissionError::Validation(
            ValidationError::MissingAnswer(_) | ValidationError::NoResponses
        )
    ));
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Saved);
}

#[test]
fn successful_pass_uploads_every_artifact_and_marks_instance_uploaded() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &["a.jpg", "b.png"]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();

    let summary = pipeline.run_pass().unwrap();

    assert_eq!(summary.artifacts_synced, 3);
    assert_eq!(summary.instances_uploaded, vec![SurveyInstanceId::new("uuid-1")]);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);
    assert_eq!(harness.server.notified_files(), vec!["uuid-1.zip", "a.jpg", "b.png"]);
    let objects = harness.artifacts.objects.lock().unwrap().clone();
    assert!(objects.contains_key("devicezip/uuid-1.zip"));
    assert!(objects.contains_key("images/a.jpg"));
    let public = harness.artifacts.public.lock().unwrap().clone();
    assert_eq!(public.get("devicezip/uuid-1.zip"), Some(&false));
    assert_eq!(public.get("images/b.png"), Some(&true));
    assert!(harness.audit.names().contains(&"pass_completed"));
}

#[test]
fn second_artifact_notify_404_marks_form_deleted_and_keeps_instance_unuploaded() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &["a.jpg"]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    harness.server.fail_notify("a.jpg", NetworkError::NotFound("form f1".to_string()));

    let summary = pipeline.run_pass().unwrap();

    let records = rows(&harness, "uuid-1");
    assert_eq!(row(&records, "uuid-1.zip").status, TransmissionStatus::Synced);
    assert_eq!(row(&records, "a.jpg").status, TransmissionStatus::FormDeleted);
    assert!(summary.instances_uploaded.is_empty());
    assert_eq!(summary.instances_form_deleted, vec![SurveyInstanceId::new("uuid-1")]);
    assert_eq!(summary.deleted_forms, vec![FormId::new("f1")]);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::SubmitRequested);
    assert!(harness.gateway.form(&FormId::new("f1")).unwrap().unwrap().deleted);

    // Export retry skips instances of deleted forms.
    let again = pipeline.run_pass().unwrap();
    assert_eq!(again.exported, 0);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::SubmitRequested);
}

#[test]
fn low_storage_interrupts_before_any_network_call() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(80 * 1024 * 1024);
    pipeline.submissions().request_submission(&store).unwrap();

    let err = pipeline.run_pass().unwrap_err();

    assert_eq!(err, SyncError::StorageExhausted {
        available: 80 * 1024 * 1024,
        required: 100 * 1024 * 1024,
    });
    assert!(harness.server.notified_files().is_empty());
    assert_eq!(harness.artifacts.write_count(), 0);
    assert_eq!(row(&rows(&harness, "uuid-1"), "uuid-1.zip").status, TransmissionStatus::Queued);
    assert!(harness.audit.names().contains(&"pass_interrupted"));
}

#[test]
fn enqueue_and_re_export_are_idempotent() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &["a.jpg"]);
    let pipeline = harness.pipeline(ENOUGH);
    let first = pipeline.submissions().request_submission(&store).unwrap();

    let id = SurveyInstanceId::new("uuid-1");
    let again = harness.gateway.enqueue_transmission(&id, "uuid-1.zip").unwrap();
    let submitted_at = harness.gateway.instance(&id).unwrap().unwrap().updated_at;
    let second = pipeline.submissions().export(&store, submitted_at).unwrap();

    assert_eq!(again.id, first[0].id);
    assert_eq!(
        first.iter().map(|record| record.id).collect::<Vec<_>>(),
        second.iter().map(|record| record.id).collect::<Vec<_>>()
    );
    assert_eq!(rows(&harness, "uuid-1").len(), 2);
}

#[test]
fn interrupted_pass_reuploads_nothing_and_only_renotifies() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    harness.server.fail_notify("uuid-1.zip", NetworkError::Transient("timeout".to_string()));
    harness.server.fail_notify("uuid-1.zip", NetworkError::Transient("timeout".to_string()));

    let first = pipeline.run_pass().unwrap();
    assert_eq!(first.artifacts_failed, 1);
    assert_eq!(first.instances_failed, vec![SurveyInstanceId::new("uuid-1")]);
    let failed = rows(&harness, "uuid-1");
    assert_eq!(failed[0].status, TransmissionStatus::Failed);
    assert!(failed[0].last_error.is_some());
    assert_eq!(harness.artifacts.write_count(), 1);

    let second = pipeline.run_pass().unwrap();

    assert_eq!(second.artifacts_synced, 1);
    assert_eq!(harness.artifacts.write_count(), 1);
    assert_eq!(harness.artifacts.objects.lock().unwrap().len(), 1);
    let synced = rows(&harness, "uuid-1");
    assert_eq!(synced[0].status, TransmissionStatus::Synced);
    assert_eq!(synced[0].attempts, 2);
    assert!(synced[0].checksum.is_some());
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);
}

#[test]
fn assignment_required_stops_the_pass() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    harness.server.fail_notify("uuid-1.zip", NetworkError::AssignmentRequired("403".to_string()));

    let err = pipeline.run_pass().unwrap_err();

    assert!(matches!(err, SyncError::AssignmentRequired(_)));
    assert_eq!(row(&rows(&harness, "uuid-1"), "uuid-1.zip").status, TransmissionStatus::Failed);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Submitted);
}

#[test]
fn unknown_extensions_are_skipped_without_blocking_upload() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    harness.gateway.enqueue_transmission(&SurveyInstanceId::new("uuid-1"), "notes.txt").unwrap();

    let summary = pipeline.run_pass().unwrap();

    assert_eq!(summary.artifacts_skipped, 1);
    assert_eq!(summary.artifacts_synced, 1);
    assert!(harness.audit.names().contains(&"artifact_skipped"));
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);
}

#[test]
fn skipped_rows_settle_after_one_pass() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    harness.gateway.enqueue_transmission(&SurveyInstanceId::new("uuid-1"), "notes.txt").unwrap();

    let skipped: Vec<usize> =
        (0 .. 3).map(|_| pipeline.run_pass().unwrap().artifacts_skipped).collect();

    assert_eq!(skipped, vec![1, 0, 0]);
    let rows = rows(&harness, "uuid-1");
    let notes = row(&rows, "notes.txt");
    assert_eq!(notes.status, TransmissionStatus::Skipped);
    assert_eq!(notes.attempts, 0);
    assert_eq!(harness.gateway.pending_transmission_count(&FormId::new("f1")).unwrap(), 0);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);
}

#[test]
fn server_reported_missing_files_are_requeued_and_resent() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    pipeline.run_pass().unwrap();
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);

    harness.server.pending.lock().unwrap().missing_files = vec!["uuid-1.zip".to_string()];
    let summary = pipeline.run_pass().unwrap();

    assert_eq!(summary.requeued, 1);
    assert_eq!(summary.artifacts_synced, 1);
    assert_eq!(harness.server.notified_files(), vec!["uuid-1.zip", "uuid-1.zip"]);
    assert_eq!(harness.artifacts.write_count(), 1);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);
}

#[test]
fn server_reported_deleted_forms_settle_pending_rows_without_upload() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    harness.server.pending.lock().unwrap().deleted_forms = vec![FormId::new("f1")];

    let summary = pipeline.run_pass().unwrap();

    assert_eq!(summary.deleted_forms, vec![FormId::new("f1")]);
    assert_eq!(harness.artifacts.write_count(), 0);
    let records = rows(&harness, "uuid-1");
    assert_eq!(records[0].status, TransmissionStatus::FormDeleted);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::SubmitRequested);
    // Responses stay local for audit.
    assert!(!harness.gateway.responses(&SurveyInstanceId::new("uuid-1")).unwrap().is_empty());
}

#[test]
fn missing_archive_is_rebuilt_by_export_retry() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &[]);
    let pipeline = harness.pipeline(ENOUGH);
    pipeline.submissions().request_submission(&store).unwrap();
    std::fs::remove_file(harness.files.data_dir().join("uuid-1.zip")).unwrap();

    let summary = pipeline.run_pass().unwrap();

    assert_eq!(summary.exported, 1);
    assert!(harness.audit.names().contains(&"instance_archive_missing"));
    assert!(harness.files.data_dir().join("uuid-1.zip").exists());
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);
}

#[test]
fn crash_after_submit_request_is_recovered_by_export_retry() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let store = harness.answered_instance(&form, "uuid-1", &["a.jpg"]);
    let responses: Vec<_> = store.responses().cloned().collect();
    harness.gateway.commit_submission(&SurveyInstanceId::new("uuid-1"), &responses).unwrap();
    let pipeline = harness.pipeline(ENOUGH);

    let summary = pipeline.run_pass().unwrap();

    assert_eq!(summary.exported, 1);
    assert_eq!(summary.artifacts_synced, 2);
    assert_eq!(status_of(&harness, "uuid-1"), SubmissionStatus::Uploaded);
}

#[test]
fn independent_instances_are_processed_in_one_pass() {
    let harness = Harness::new();
    let form = harness.install_photo_form("f1");
    let pipeline = harness.pipeline(ENOUGH);
    for index in 0 .. 5 {
        let store = harness.answered_instance(&form, &format!("uuid-{index}"), &[]);
        pipeline.submissions().request_submission(&store).unwrap();
    }
    harness.server.fail_notify("uuid-3.zip", NetworkError::Rejected {
        status: 400,
        message: "bad archive".to_string(),
    });

    let summary = pipeline.run_pass().unwrap();

    assert_eq!(summary.instances_uploaded.len(), 4);
    assert_eq!(summary.instances_failed, vec![SurveyInstanceId::new("uuid-3")]);
    assert_eq!(status_of(&harness, "uuid-3"), SubmissionStatus::Submitted);
}

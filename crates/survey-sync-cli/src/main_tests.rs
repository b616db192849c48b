// crates/survey-sync-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Argument parsing, wiring, and report rendering.
// Purpose: Keep CLI output stable and wiring fail-closed.
// Dependencies: survey-sync-cli main helpers
// ============================================================================

//! ## Overview
//! Exercises the CLI helpers without touching the network.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::ExitCode;

use clap::Parser;
use survey_sync_config::AuditConfig;
use survey_sync_config::AuditSinkKind;
use survey_sync_config::SurveySyncConfig;
use survey_sync_core::FormId;
use survey_sync_core::FormSyncError;
use survey_sync_core::FormSyncOutcome;
use survey_sync_core::FormSyncReport;
use survey_sync_core::FormVersion;
use survey_sync_core::SurveyInstanceId;
use survey_sync_core::SyncSummary;
use survey_sync_core::runtime::archive;

use super::Cli;
use super::Commands;
use super::FormsCommand;
use super::OutputFormat;
use super::audit_sink;
use super::command_forms;
use super::command_status;
use super::form_report;
use super::local_services;
use super::purge_report;
use super::summary_report;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn local_config(dir: &std::path::Path) -> SurveySyncConfig {
    let mut config = SurveySyncConfig::from_toml(
        r#"
[device]
id = "device-7"

[server]
base_url = "https://forms.example.org/api"

[upload]
bucket = "survey-artifacts"

[audit]
sink = "none"
"#,
    )
    .unwrap();
    config.storage.store_path = dir.join("survey-sync.db");
    config.storage.data_dir = dir.join("data");
    config.storage.media_dir = dir.join("media");
    config.storage.resource_dir = dir.join("resources");
    config.storage.min_free_bytes = 0;
    config.validate().unwrap();
    config
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn reload_accepts_repeated_form_flags_and_global_options() {
    let cli = Cli::try_parse_from([
        "survey-sync",
        "forms",
        "reload",
        "--form",
        "A",
        "--form",
        "B",
        "--format",
        "json",
    ])
    .unwrap();

    assert_eq!(cli.format, OutputFormat::Json);
    let Commands::Forms {
        command: FormsCommand::Reload(reload),
    } = cli.command
    else {
        panic!("expected forms reload");
    };
    assert_eq!(reload.forms, vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn bootstrap_takes_the_bundle_path() {
    let cli = Cli::try_parse_from(["survey-sync", "forms", "bootstrap", "bundle.zip"]).unwrap();

    let Commands::Forms {
        command: FormsCommand::Bootstrap(bootstrap),
    } = cli.command
    else {
        panic!("expected forms bootstrap");
    };
    assert_eq!(bootstrap.archive, std::path::PathBuf::from("bundle.zip"));
    assert!(Cli::try_parse_from(["survey-sync", "forms", "bootstrap"]).is_err());
}

#[test]
fn unknown_commands_are_rejected() {
    assert!(Cli::try_parse_from(["survey-sync", "serve"]).is_err());
    assert!(Cli::try_parse_from(["survey-sync"]).is_err());
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

#[test]
fn file_audit_sink_requires_a_path() {
    let missing = AuditConfig {
        sink: AuditSinkKind::File,
        path: None,
    };
    assert!(audit_sink(&missing).is_err());

    let dir = tempfile::tempdir().unwrap();
    let present = AuditConfig {
        sink: AuditSinkKind::File,
        path: Some(dir.path().join("audit.jsonl")),
    };
    assert!(audit_sink(&present).is_ok());
}

#[test]
fn local_services_create_store_and_directories() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(dir.path());

    local_services(&config).unwrap();

    assert!(dir.path().join("survey-sync.db").exists());
    assert!(dir.path().join("media").is_dir());
    assert!(dir.path().join("resources").is_dir());
}

#[test]
fn status_on_an_empty_store_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(dir.path());

    let code = command_status(&config, OutputFormat::Json).unwrap();

    assert_eq!(code, ExitCode::SUCCESS);
}

#[test]
fn bootstrap_installs_into_the_local_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = local_config(dir.path());
    let definition = br#"{"id": "A", "version": "1.0", "resources": ["cascade-1"],
        "groups": [{"id": "g1", "questions": [{"id": "q", "type": "free_text"}]}]}"#;
    let cascade = archive::build(&[("cascade-1.sqlite", b"db".as_slice())]).unwrap();
    let bundle = archive::build(&[
        ("A.json", definition.as_slice()),
        ("cascade-1.zip", cascade.as_slice()),
    ])
    .unwrap();
    let path = dir.path().join("bundle.zip");
    std::fs::write(&path, bundle).unwrap();
    let command =
        Cli::try_parse_from(["survey-sync", "forms", "bootstrap", path.to_str().unwrap()])
            .unwrap();
    let Commands::Forms {
        command,
    } = command.command
    else {
        panic!("expected forms command");
    };

    let code = command_forms(&config, command, OutputFormat::Json).unwrap();

    assert_eq!(code, ExitCode::SUCCESS);
    assert!(dir.path().join("resources").join("cascade-1.sqlite").exists());
}

// ============================================================================
// SECTION: Reports
// ============================================================================

#[test]
fn form_report_lists_outcomes_then_failures() {
    let report = FormSyncReport {
        outcomes: vec![
            FormSyncOutcome::Installed {
                form_id: FormId::new("A"),
                version: FormVersion::parse("2.0").unwrap(),
                help_downloaded: true,
            },
            FormSyncOutcome::Deleted {
                form_id: FormId::new("B"),
            },
        ],
        failures: vec![(FormId::new("C"), FormSyncError::NotFound(FormId::new("C")))],
    };

    let rendered = form_report(&report);

    assert_eq!(rendered.lines[0], "installed A 2.0");
    assert_eq!(rendered.lines[1], "deleted B");
    assert!(rendered.lines[2].starts_with("failed C: "));
    assert_eq!(rendered.json["outcomes"][0]["version"], "2.0");
    assert!(rendered.json["outcomes"][1]["version"].is_null());
    assert_eq!(rendered.json["failures"][0]["formId"], "C");
}

#[test]
fn summary_report_carries_every_counter() {
    let summary = SyncSummary {
        instances_uploaded: vec![SurveyInstanceId::new("u1")],
        instances_failed: vec![SurveyInstanceId::new("u2")],
        artifacts_synced: 3,
        artifacts_failed: 1,
        artifacts_skipped: 1,
        deleted_forms: vec![FormId::new("gone")],
        exported: 2,
        ..SyncSummary::default()
    };

    let rendered = summary_report(&summary);

    assert!(rendered.lines.contains(&"artifacts synced 3 failed 1 skipped 1".to_string()));
    assert!(rendered.lines.contains(&"deleted forms [gone]".to_string()));
    assert_eq!(rendered.json["instancesUploaded"][0], "u1");
    assert_eq!(rendered.json["instancesFailed"][0], "u2");
    assert_eq!(rendered.json["exported"], 2);
}

#[test]
fn purge_report_names_each_form() {
    let rendered = purge_report(&[FormId::new("A"), FormId::new("B")]);

    assert_eq!(rendered.lines, vec!["purged A".to_string(), "purged B".to_string()]);
    assert_eq!(rendered.json["purged"][1], "B");
}

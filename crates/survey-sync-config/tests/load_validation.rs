//! Load and validation tests for survey-sync-config.
// crates/survey-sync-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: File loading, defaults, and per-section constraints.
// Purpose: Ensure configuration fails closed on malformed or unsafe input.
// =============================================================================

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use survey_sync_config::AuditSinkKind;
use survey_sync_config::ConfigError;
use survey_sync_config::MAX_CONFIG_FILE_SIZE;
use survey_sync_config::SurveySyncConfig;
use survey_sync_store_sqlite::SqliteJournalMode;
use tempfile::TempDir;

mod common;

type TestResult = Result<(), String>;

#[test]
fn minimal_config_applies_defaults() -> TestResult {
    let config = common::minimal_config().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;

    let pipeline = config.pipeline_config();
    if pipeline.workers != 2 || pipeline.retry.attempts != 3 {
        return Err("unexpected sync defaults".to_string());
    }
    if pipeline.retry.backoff != Duration::from_millis(500) {
        return Err("unexpected backoff default".to_string());
    }
    if pipeline.min_free_bytes != 100 * 1024 * 1024 {
        return Err("unexpected free space threshold".to_string());
    }
    let gateway = config.gateway_config();
    if gateway.path != PathBuf::from("survey-sync.db")
        || gateway.journal_mode != SqliteJournalMode::Wal
    {
        return Err("unexpected storage defaults".to_string());
    }
    if config.audit.sink != AuditSinkKind::Stderr || config.device_id().as_str() != "device-7" {
        return Err("unexpected audit or device defaults".to_string());
    }
    Ok(())
}

#[test]
fn load_reads_and_validates_a_file() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("survey-sync.toml");
    let body = format!(
        "{}\n[storage]\nstore_path = \"{}\"\njournal_mode = \"delete\"\n\n[sync]\nworkers = 4\n",
        common::MINIMAL_TOML,
        dir.path().join("store.db").display()
    );
    fs::write(&path, body).map_err(|err| err.to_string())?;

    let config = SurveySyncConfig::load(Some(&path)).map_err(|err| err.to_string())?;

    if config.sync.workers != 4 || config.storage.journal_mode != SqliteJournalMode::Delete {
        return Err("file values were not applied".to_string());
    }
    Ok(())
}

#[test]
fn load_rejects_oversized_files() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("big.toml");
    let body = format!("{}\n#{}\n", common::MINIMAL_TOML, "x".repeat(MAX_CONFIG_FILE_SIZE));
    fs::write(&path, body).map_err(|err| err.to_string())?;
    let result = SurveySyncConfig::load(Some(&path)).map(|_| ());
    common::assert_invalid(result, "exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_files() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let path = dir.path().join("bad.toml");
    fs::write(&path, [0xff, 0xfe, 0x00]).map_err(|err| err.to_string())?;
    let result = SurveySyncConfig::load(Some(&path)).map(|_| ());
    common::assert_invalid(result, "utf-8")
}

#[test]
fn missing_sections_fail_to_parse() -> TestResult {
    match SurveySyncConfig::from_toml("[device]\nid = \"d\"\n") {
        Err(ConfigError::Parse(_)) => Ok(()),
        Err(other) => Err(format!("unexpected error: {other}")),
        Ok(_) => Err("expected a parse error".to_string()),
    }
}

#[test]
fn missing_file_reports_io_error() -> TestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    match SurveySyncConfig::load(Some(&dir.path().join("absent.toml"))) {
        Err(ConfigError::Io(_)) => Ok(()),
        Err(other) => Err(format!("unexpected error: {other}")),
        Ok(_) => Err("expected an io error".to_string()),
    }
}

#[test]
fn blank_device_id_is_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.device.id = "   ".to_string();
    common::assert_invalid(config.validate(), "device.id must be set")
}

#[test]
fn plain_http_server_requires_opt_in() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.base_url = "http://forms.local".to_string();
    common::assert_invalid(config.validate(), "without allow_http")?;
    config.server.allow_http = true;
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn server_limits_are_bounded() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.server.timeout_ms = 0;
    common::assert_invalid(config.validate(), "server.timeout_ms out of range")?;
    config.server.timeout_ms = 1_000;
    config.server.max_response_bytes = 0;
    common::assert_invalid(config.validate(), "server.max_response_bytes out of range")
}

#[test]
fn upload_requires_bucket_and_safe_prefix() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.upload.bucket = " ".to_string();
    common::assert_invalid(config.validate(), "upload.bucket must be set")?;
    config.upload.bucket = "artifacts".to_string();
    config.upload.prefix = Some("device/../other".to_string());
    common::assert_invalid(config.validate(), "dot segments")?;
    config.upload.prefix = Some("/absolute".to_string());
    common::assert_invalid(config.validate(), "must be relative")
}

#[test]
fn sync_bounds_are_enforced() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.sync.workers = 0;
    common::assert_invalid(config.validate(), "sync.workers out of range")?;
    config.sync.workers = 2;
    config.sync.retry_attempts = 0;
    common::assert_invalid(config.validate(), "sync.retry_attempts out of range")
}

#[test]
fn file_audit_sink_requires_path() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.audit.sink = AuditSinkKind::File;
    common::assert_invalid(config.validate(), "audit.path is required")?;
    config.audit.path = Some(PathBuf::from("audit.jsonl"));
    config.validate().map_err(|err| err.to_string())?;
    config.audit.sink = AuditSinkKind::None;
    common::assert_invalid(config.validate(), "only valid for the file sink")
}

#[test]
fn shared_data_and_media_dirs_are_rejected() -> TestResult {
    let mut config = common::minimal_config().map_err(|err| err.to_string())?;
    config.storage.media_dir = config.storage.data_dir.clone();
    common::assert_invalid(config.validate(), "storage.data_dir must differ")
}

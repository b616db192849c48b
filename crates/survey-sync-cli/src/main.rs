// crates/survey-sync-cli/src/main.rs
// ============================================================================
// Module: Survey Sync CLI Entry Point
// Description: Command dispatcher for form sync and artifact upload passes.
// Purpose: Run sync work from a device shell or scheduler.
// Dependencies: clap, survey-sync-config, survey-sync-core, survey-sync-remote,
// survey-sync-store-sqlite
// ============================================================================

//! ## Overview
//! The `survey-sync` binary wires the `SQLite` gateway, the HTTP form server,
//! and S3 artifact storage into the core engine, then runs one unit of work
//! per invocation: a form sync, a reload, a purge, or a transmission pass.
//! Results print as text or JSON; partial failures exit non-zero after the
//! full report is written.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use serde_json::Value;
use serde_json::json;
use survey_sync_config::AuditConfig;
use survey_sync_config::AuditSinkKind;
use survey_sync_config::SurveySyncConfig;
use survey_sync_core::FormId;
use survey_sync_core::FormSyncManager;
use survey_sync_core::FormSyncOutcome;
use survey_sync_core::FormSyncReport;
use survey_sync_core::PersistenceGateway;
use survey_sync_core::PipelineServices;
use survey_sync_core::StorageProbe;
use survey_sync_core::SurveyInstanceId;
use survey_sync_core::SyncAuditSink;
use survey_sync_core::SyncSummary;
use survey_sync_core::TransmissionPipeline;
use survey_sync_core::runtime::DirectoryFiles;
use survey_sync_core::runtime::FileAuditSink;
use survey_sync_core::runtime::FormSyncBatchError;
use survey_sync_core::runtime::FsStorageProbe;
use survey_sync_core::runtime::NoopAuditSink;
use survey_sync_core::runtime::StderrAuditSink;
use survey_sync_remote::HttpFormServer;
use survey_sync_remote::S3ArtifactStore;
use survey_sync_store_sqlite::SqliteGateway;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "survey-sync", version, disable_help_subcommand = true)]
struct Cli {
    /// Config file path (defaults to survey-sync.toml or `SURVEY_SYNC_CONFIG`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Output format for reports.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,
    /// Selected subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Form download, reload, and purge.
    Forms {
        /// Selected forms subcommand.
        #[command(subcommand)]
        command: FormsCommand,
    },
    /// Run one transmission pass.
    Upload,
    /// Show installed forms, pending transmissions, and free space.
    Status,
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Form subcommands.
#[derive(Subcommand, Debug)]
enum FormsCommand {
    /// Install every form assigned to this device.
    Sync,
    /// Re-check specific forms (or every installed form) for new versions.
    Reload(FormsReloadCommand),
    /// Remove deleted forms with no pending transmissions.
    Purge,
    /// Install forms and resources from a bundle on disk, without the server.
    Bootstrap(FormsBootstrapCommand),
}

/// Arguments for `forms reload`.
#[derive(Args, Debug)]
struct FormsReloadCommand {
    /// Form identifiers to reload; defaults to every installed form.
    #[arg(long = "form", value_name = "ID")]
    forms: Vec<String>,
}

/// Arguments for `forms bootstrap`.
#[derive(Args, Debug)]
struct FormsBootstrapCommand {
    /// Zip bundle holding form definitions and resource archives.
    #[arg(value_name = "ZIP")]
    archive: PathBuf,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the config file.
    Validate,
}

/// Output formats for reports.
#[derive(ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Human-readable text.
    Text,
    /// One JSON document.
    Json,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error carrying a user-facing message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    let config = SurveySyncConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(format!("config load failed: {err}")))?;
    match cli.command {
        Commands::Config {
            command: ConfigCommand::Validate,
        } => {
            write_stdout_line("config ok")?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Forms {
            command,
        } => command_forms(&config, command, cli.format),
        Commands::Upload => command_upload(&config, cli.format),
        Commands::Status => command_status(&config, cli.format),
    }
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Local services shared by every command.
struct LocalServices {
    /// `SQLite` persistence gateway.
    gateway: Arc<SqliteGateway>,
    /// Artifact and resource directories.
    files: Arc<DirectoryFiles>,
    /// Free-space probe on the data volume.
    probe: Arc<FsStorageProbe>,
    /// Audit sink selected by config.
    audit: Arc<dyn SyncAuditSink>,
}

/// Opens the store, directories, and audit sink.
fn local_services(config: &SurveySyncConfig) -> CliResult<LocalServices> {
    let gateway = SqliteGateway::new(config.gateway_config())
        .map_err(|err| CliError::new(format!("store open failed: {err}")))?;
    let storage = &config.storage;
    let files =
        DirectoryFiles::new(&storage.data_dir, &storage.media_dir, &storage.resource_dir)
            .map_err(|err| CliError::new(format!("file directories unavailable: {err}")))?;
    Ok(LocalServices {
        gateway: Arc::new(gateway),
        files: Arc::new(files),
        probe: Arc::new(FsStorageProbe::new(&storage.data_dir)),
        audit: audit_sink(&config.audit)?,
    })
}

/// Builds the audit sink named by config.
fn audit_sink(config: &AuditConfig) -> CliResult<Arc<dyn SyncAuditSink>> {
    match config.sink {
        AuditSinkKind::Stderr => Ok(Arc::new(StderrAuditSink)),
        AuditSinkKind::None => Ok(Arc::new(NoopAuditSink)),
        AuditSinkKind::File => {
            let path = config
                .path
                .as_deref()
                .ok_or_else(|| CliError::new("audit.path is required for file sink".into()))?;
            let sink = FileAuditSink::new(path)
                .map_err(|err| CliError::new(format!("audit log unavailable: {err}")))?;
            Ok(Arc::new(sink))
        }
    }
}

/// Builds the HTTP form server client.
fn form_server(config: &SurveySyncConfig) -> CliResult<Arc<HttpFormServer>> {
    HttpFormServer::new(&config.server)
        .map(Arc::new)
        .map_err(|err| CliError::new(format!("form server client failed: {err}")))
}

// ============================================================================
// SECTION: Forms Commands
// ============================================================================

/// Executes a forms subcommand.
fn command_forms(
    config: &SurveySyncConfig,
    command: FormsCommand,
    format: OutputFormat,
) -> CliResult<ExitCode> {
    let local = local_services(config)?;
    let manager = FormSyncManager::new(
        local.gateway.clone(),
        form_server(config)?,
        local.files.clone(),
        local.audit.clone(),
        config.device_id(),
    );
    let result = match command {
        FormsCommand::Sync => manager.sync_assigned_forms(),
        FormsCommand::Reload(command) => {
            if command.forms.is_empty() {
                manager.reload_installed_forms()
            } else {
                let ids: Vec<FormId> = command.forms.into_iter().map(FormId::new).collect();
                manager.reload_forms(&ids)
            }
        }
        FormsCommand::Bootstrap(command) => manager.install_bootstrap(&command.archive),
        FormsCommand::Purge => {
            let purged = manager
                .purge_deleted_forms()
                .map_err(|err| CliError::new(format!("purge failed: {err}")))?;
            write_report(&purge_report(&purged), format)?;
            return Ok(ExitCode::SUCCESS);
        }
    };
    match result {
        Ok(report) => {
            write_report(&form_report(&report), format)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(FormSyncBatchError::Partial(report)) => {
            write_report(&form_report(&report), format)?;
            Ok(ExitCode::FAILURE)
        }
        Err(err @ FormSyncBatchError::Listing(_)) => Err(CliError::new(err.to_string())),
    }
}

/// Renders a form sync report.
fn form_report(report: &FormSyncReport) -> Report {
    let mut lines = Vec::new();
    let mut outcomes = Vec::new();
    for outcome in &report.outcomes {
        let (status, version) = match outcome {
            FormSyncOutcome::UpToDate {
                version, ..
            } => ("up_to_date", Some(version)),
            FormSyncOutcome::Installed {
                version, ..
            } => ("installed", Some(version)),
            FormSyncOutcome::Deleted {
                ..
            } => ("deleted", None),
        };
        let form_id = outcome.form_id().as_str();
        let version = version.map(|version| version.as_str().to_string());
        lines.push(match &version {
            Some(version) => format!("{status} {form_id} {version}"),
            None => format!("{status} {form_id}"),
        });
        outcomes.push(json!({"formId": form_id, "status": status, "version": version}));
    }
    let mut failures = Vec::new();
    for (form_id, err) in &report.failures {
        lines.push(format!("failed {form_id}: {err}"));
        failures.push(json!({"formId": form_id.as_str(), "error": err.to_string()}));
    }
    Report {
        lines,
        json: json!({"outcomes": outcomes, "failures": failures}),
    }
}

/// Renders the list of purged forms.
fn purge_report(purged: &[FormId]) -> Report {
    Report {
        lines: purged.iter().map(|id| format!("purged {id}")).collect(),
        json: json!({"purged": purged.iter().map(FormId::as_str).collect::<Vec<_>>()}),
    }
}

// ============================================================================
// SECTION: Upload Command
// ============================================================================

/// Runs one transmission pass.
fn command_upload(config: &SurveySyncConfig, format: OutputFormat) -> CliResult<ExitCode> {
    let local = local_services(config)?;
    let artifacts = S3ArtifactStore::new(&config.upload)
        .map_err(|err| CliError::new(format!("artifact store unavailable: {err}")))?;
    let pipeline = TransmissionPipeline::new(
        PipelineServices {
            gateway: local.gateway,
            server: form_server(config)?,
            artifacts: Arc::new(artifacts),
            files: local.files,
            probe: local.probe,
            audit: local.audit,
            device_id: config.device_id(),
        },
        config.pipeline_config(),
    );
    let summary =
        pipeline.run_pass().map_err(|err| CliError::new(format!("sync pass failed: {err}")))?;
    write_report(&summary_report(&summary), format)?;
    if summary.instances_failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Renders a pass summary.
fn summary_report(summary: &SyncSummary) -> Report {
    let deleted: Vec<String> = summary.deleted_forms.iter().map(ToString::to_string).collect();
    let lines = vec![
        format!("exported {}", summary.exported),
        format!("requeued {}", summary.requeued),
        format!(
            "artifacts synced {} failed {} skipped {}",
            summary.artifacts_synced, summary.artifacts_failed, summary.artifacts_skipped
        ),
        format!(
            "instances uploaded {} failed {} form_deleted {}",
            summary.instances_uploaded.len(),
            summary.instances_failed.len(),
            summary.instances_form_deleted.len()
        ),
        format!("deleted forms [{}]", deleted.join(", ")),
    ];
    Report {
        lines,
        json: json!({
            "exported": summary.exported,
            "requeued": summary.requeued,
            "artifactsSynced": summary.artifacts_synced,
            "artifactsFailed": summary.artifacts_failed,
            "artifactsSkipped": summary.artifacts_skipped,
            "instancesUploaded": instance_ids(&summary.instances_uploaded),
            "instancesFailed": instance_ids(&summary.instances_failed),
            "instancesFormDeleted": instance_ids(&summary.instances_form_deleted),
            "deletedForms": deleted,
        }),
    }
}

/// Returns instance ids as strings.
fn instance_ids(values: &[SurveyInstanceId]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

// ============================================================================
// SECTION: Status Command
// ============================================================================

/// Reports installed forms, pending transmissions, and free space.
fn command_status(config: &SurveySyncConfig, format: OutputFormat) -> CliResult<ExitCode> {
    let local = local_services(config)?;
    let status_error = |err: &dyn std::fmt::Display| CliError::new(format!("status failed: {err}"));
    local.gateway.readiness().map_err(|err| status_error(&err))?;
    let mut form_ids = local.gateway.form_ids().map_err(|err| status_error(&err))?;
    form_ids.sort();
    let mut lines = Vec::new();
    let mut forms = Vec::new();
    for form_id in &form_ids {
        let Some(form) = local.gateway.form(form_id).map_err(|err| status_error(&err))? else {
            continue;
        };
        let pending =
            local.gateway.pending_transmission_count(form_id).map_err(|err| status_error(&err))?;
        let version = form.version().as_str().to_string();
        lines.push(format!(
            "form {form_id} {version}{} pending {pending}",
            if form.deleted { " deleted" } else { "" }
        ));
        forms.push(json!({
            "formId": form_id.as_str(),
            "version": version,
            "deleted": form.deleted,
            "pendingTransmissions": pending,
        }));
    }
    let available = local.probe.available_bytes().map_err(|err| status_error(&err))?;
    let required = config.storage.min_free_bytes;
    lines.push(format!("free bytes {available} (minimum {required})"));
    let report = Report {
        lines,
        json: json!({"forms": forms, "freeBytes": available, "minFreeBytes": required}),
    };
    write_report(&report, format)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Command output in both supported formats.
struct Report {
    /// Text lines.
    lines: Vec<String>,
    /// JSON document.
    json: Value,
}

/// Writes a report in the requested format.
fn write_report(report: &Report, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Text => report.lines.iter().try_for_each(|line| write_stdout_line(line)),
        OutputFormat::Json => write_stdout_line(&report.json.to_string()),
    }
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("stdout write failed: {err}")))
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let mut stderr = std::io::stderr();
    let _ = writeln!(&mut stderr, "{message}");
    ExitCode::FAILURE
}

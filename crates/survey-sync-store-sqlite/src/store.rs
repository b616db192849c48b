// crates/survey-sync-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Persistence Gateway
// Description: Durable PersistenceGateway backed by SQLite.
// Purpose: Persist forms, instances, responses, and transmissions atomically.
// Dependencies: survey-sync-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements [`PersistenceGateway`] on a single `SQLite`
//! connection guarded by a mutex. Every trait call opens one transaction,
//! so multi-row commits either land completely or not at all. Form
//! definitions are stored as JSON next to a content hash; loads recompute the
//! hash and fail closed on mismatch. Database contents are untrusted: labels
//! and identifiers are re-validated on every read.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Params;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use survey_sync_core::Form;
use survey_sync_core::FormDefinition;
use survey_sync_core::FormHeader;
use survey_sync_core::FormId;
use survey_sync_core::FormVersion;
use survey_sync_core::GatewayError;
use survey_sync_core::HashAlgorithm;
use survey_sync_core::HashDigest;
use survey_sync_core::InstalledForm;
use survey_sync_core::Iteration;
use survey_sync_core::PersistenceGateway;
use survey_sync_core::QuestionId;
use survey_sync_core::QuestionResponse;
use survey_sync_core::ResponseKey;
use survey_sync_core::ResponseType;
use survey_sync_core::SubmissionStatus;
use survey_sync_core::SurveyGroup;
use survey_sync_core::SurveyGroupId;
use survey_sync_core::SurveyInstance;
use survey_sync_core::SurveyInstanceId;
use survey_sync_core::Timestamp;
use survey_sync_core::TransmissionId;
use survey_sync_core::TransmissionRecord;
use survey_sync_core::TransmissionStatus;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the gateway.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum serialized form definition size accepted by the gateway.
pub const MAX_DEFINITION_BYTES: usize = 8 * 1024 * 1024;
/// Transmission states that still need work.
const PENDING_STATUSES: [TransmissionStatus; 3] =
    [TransmissionStatus::Queued, TransmissionStatus::InProgress, TransmissionStatus::Failed];
/// Column list shared by every transmission query.
const TRANSMISSION_COLUMNS: &str = "id, survey_instance_id, form_id, filename, status, checksum, \
                                    hash_algorithm, attempts, last_error, created_at, updated_at";
/// Column list shared by every survey instance query.
const INSTANCE_COLUMNS: &str =
    "id, form_id, form_version, status, created_at, submitted_at, updated_at";
/// Column list shared by every response query.
const RESPONSE_COLUMNS: &str =
    "id, survey_instance_id, question_id, iteration, value, response_type, filename, include";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` persistence gateway.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteGatewayConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteGatewayConfig {
    /// Creates a config with default pragmas for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` gateway errors.
///
/// # Invariants
/// - Error messages avoid embedding response values or definition payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteGatewayError {
    /// Gateway I/O error.
    #[error("sqlite gateway io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite gateway db error: {0}")]
    Db(String),
    /// Stored row fails integrity checks.
    #[error("sqlite gateway corruption: {0}")]
    Corrupt(String),
    /// Stored schema version mismatch.
    #[error("sqlite gateway version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid input data.
    #[error("sqlite gateway invalid data: {0}")]
    Invalid(String),
    /// Referenced row is absent.
    #[error("sqlite gateway record not found: {0}")]
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
    /// Responses of a submitted instance cannot change.
    #[error("responses of {instance} are frozen in status {status}")]
    Frozen {
        /// Instance identifier.
        instance: String,
        /// Current status label.
        status: &'static str,
    },
    /// Payload exceeded size limits.
    #[error("sqlite gateway payload too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual payload size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteGatewayError> for GatewayError {
    fn from(error: SqliteGatewayError) -> Self {
        match error {
            SqliteGatewayError::Io(message) => Self::Io(message),
            SqliteGatewayError::Db(message) => Self::Store(message),
            SqliteGatewayError::Corrupt(message) => Self::Corrupt(message),
            SqliteGatewayError::VersionMismatch(message) => Self::VersionMismatch(message),
            SqliteGatewayError::Invalid(message) => Self::Invalid(message),
            SqliteGatewayError::NotFound(message) => Self::NotFound(message),
            SqliteGatewayError::InvalidTransition {
                instance,
                from,
                to,
            } => Self::InvalidTransition {
                instance,
                from,
                to,
            },
            SqliteGatewayError::Frozen {
                instance,
                status,
            } => Self::Frozen {
                instance,
                status,
            },
            SqliteGatewayError::TooLarge {
                max_bytes,
                actual_bytes,
            } => Self::Invalid(format!(
                "payload exceeds size limit: {actual_bytes} bytes (max {max_bytes})"
            )),
        }
    }
}

/// Maps an engine error into a gateway error.
#[allow(clippy::needless_pass_by_value, reason = "Used directly as a map_err adapter.")]
fn db_error(err: rusqlite::Error) -> SqliteGatewayError {
    SqliteGatewayError::Db(err.to_string())
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// SQLite-backed persistence gateway.
///
/// # Invariants
/// - One connection serves every caller; the mutex serializes transactions.
/// - Transmission rows are unique per `(survey_instance_id, filename)`.
#[derive(Clone)]
pub struct SqliteGateway {
    /// Gateway configuration.
    config: SqliteGatewayConfig,
    /// Shared `SQLite` connection.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteGateway {
    /// Opens (or creates) the database and validates its schema version.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteGatewayError`] when the path is invalid, the database
    /// cannot be opened, or the schema version does not match.
    pub fn new(config: SqliteGatewayConfig) -> Result<Self, SqliteGatewayError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Returns the gateway configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteGatewayConfig {
        &self.config
    }

    /// Runs `work` inside one transaction, committing on success.
    fn with_tx<T>(
        &self,
        work: impl FnOnce(&Connection) -> Result<T, SqliteGatewayError>,
    ) -> Result<T, GatewayError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| SqliteGatewayError::Db("mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(db_error)?;
        let output = work(&tx)?;
        tx.commit().map_err(db_error)?;
        drop(guard);
        Ok(output)
    }
}

impl PersistenceGateway for SqliteGateway {
    fn upsert_survey_group(&self, id: &SurveyGroupId, name: &str) -> Result<(), GatewayError> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO survey_groups (id, name, viewed) VALUES (?1, ?2, 0)
                 ON CONFLICT (id) DO UPDATE SET name = excluded.name",
                params![id.as_str(), name],
            )
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn survey_group(&self, id: &SurveyGroupId) -> Result<Option<SurveyGroup>, GatewayError> {
        self.with_tx(|tx| {
            tx.query_row(
                "SELECT name, viewed FROM survey_groups WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(SurveyGroup {
                        id: id.clone(),
                        name: row.get(0)?,
                        viewed: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(db_error)
        })
    }

    fn set_survey_group_viewed(
        &self,
        id: &SurveyGroupId,
        viewed: bool,
    ) -> Result<(), GatewayError> {
        self.with_tx(|tx| {
            let changed = tx
                .execute(
                    "UPDATE survey_groups SET viewed = ?1 WHERE id = ?2",
                    params![viewed, id.as_str()],
                )
                .map_err(db_error)?;
            if changed == 0 {
                return Err(SqliteGatewayError::NotFound(format!("survey group {id}")));
            }
            Ok(())
        })
    }

    fn install_form(&self, form: &InstalledForm) -> Result<(), GatewayError> {
        let header_json = serde_json::to_vec(&form.header)
            .map_err(|err| SqliteGatewayError::Invalid(err.to_string()))?;
        let definition = form.definition.as_ref().map(encode_definition).transpose()?;
        let (definition_json, definition_hash, hash_algorithm) = match definition {
            Some((bytes, digest)) => {
                (Some(bytes), Some(digest.value), Some(digest.algorithm.as_str()))
            }
            None => (None, None, None),
        };
        self.with_tx(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO forms (
                    id, version, header_json, definition_json, definition_hash,
                    hash_algorithm, help_downloaded, deleted, installed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    form.id().as_str(),
                    form.version().as_str(),
                    header_json,
                    definition_json,
                    definition_hash,
                    hash_algorithm,
                    form.help_downloaded,
                    form.deleted,
                    form.installed_at.as_unix_millis(),
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn form(&self, id: &FormId) -> Result<Option<InstalledForm>, GatewayError> {
        let row = self.with_tx(|tx| {
            tx.query_row(
                "SELECT header_json, definition_json, definition_hash, hash_algorithm,
                        help_downloaded, deleted, installed_at
                 FROM forms WHERE id = ?1",
                params![id.as_str()],
                map_form_row,
            )
            .optional()
            .map_err(db_error)
        })?;
        row.map(FormRow::into_form).transpose().map_err(GatewayError::from)
    }

    fn form_version(&self, id: &FormId) -> Result<Option<FormVersion>, GatewayError> {
        let version: Option<String> = self.with_tx(|tx| {
            tx.query_row("SELECT version FROM forms WHERE id = ?1", params![id.as_str()], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_error)
        })?;
        let Some(version) = version else {
            return Ok(None);
        };
        FormVersion::parse(&version).map(Some).map_err(|err| {
            GatewayError::Corrupt(format!("stored version for form {id} is invalid: {err}"))
        })
    }

    fn form_ids(&self) -> Result<Vec<FormId>, GatewayError> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare("SELECT id FROM forms ORDER BY id").map_err(db_error)?;
            let rows = stmt.query_map(params![], |row| row.get::<_, String>(0)).map_err(db_error)?;
            let ids = rows.map(|row| row.map(FormId::new).map_err(db_error)).collect();
            ids
        })
    }

    fn mark_form_deleted(&self, id: &FormId) -> Result<bool, GatewayError> {
        self.with_tx(|tx| {
            let changed = tx
                .execute("UPDATE forms SET deleted = 1 WHERE id = ?1", params![id.as_str()])
                .map_err(db_error)?;
            Ok(changed > 0)
        })
    }

    fn delete_form(&self, id: &FormId) -> Result<(), GatewayError> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM forms WHERE id = ?1", params![id.as_str()])
                .map_err(db_error)?;
            Ok(())
        })
    }

    fn create_instance(&self, instance: &SurveyInstance) -> Result<(), GatewayError> {
        self.with_tx(|tx| {
            if load_instance(tx, &instance.id)?.is_some() {
                return Err(SqliteGatewayError::Invalid(format!(
                    "survey instance already exists: {}",
                    instance.id
                )));
            }
            tx.execute(
                "INSERT INTO survey_instances (
                    id, form_id, form_version, status, created_at, submitted_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    instance.id.as_str(),
                    instance.form_id.as_str(),
                    instance.form_version.as_str(),
                    instance.status.as_str(),
                    instance.created_at.as_unix_millis(),
                    instance.submitted_at.map(Timestamp::as_unix_millis),
                    instance.updated_at.as_unix_millis(),
                ],
            )
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn instance(&self, id: &SurveyInstanceId) -> Result<Option<SurveyInstance>, GatewayError> {
        self.with_tx(|tx| load_instance(tx, id))
    }

    fn instances_with_status(
        &self,
        status: SubmissionStatus,
    ) -> Result<Vec<SurveyInstance>, GatewayError> {
        self.with_tx(|tx| {
            let sql = format!(
                "SELECT {INSTANCE_COLUMNS} FROM survey_instances WHERE status = ?1
                 ORDER BY created_at, id"
            );
            let mut stmt = tx.prepare(&sql).map_err(db_error)?;
            let rows =
                stmt.query_map(params![status.as_str()], map_instance_row).map_err(db_error)?;
            let instances = rows.map(|row| row.map_err(db_error)?.into_instance()).collect();
            instances
        })
    }

    fn set_instance_status(
        &self,
        id: &SurveyInstanceId,
        status: SubmissionStatus,
    ) -> Result<SurveyInstance, GatewayError> {
        self.with_tx(|tx| transition(tx, id, status))
    }

    fn save_response(&self, response: &QuestionResponse) -> Result<QuestionResponse, GatewayError> {
        self.with_tx(|tx| {
            ensure_editable(tx, &response.survey_instance_id)?;
            upsert_response(tx, response)
        })
    }

    fn delete_response(
        &self,
        instance: &SurveyInstanceId,
        key: &ResponseKey,
    ) -> Result<bool, GatewayError> {
        self.with_tx(|tx| {
            ensure_editable(tx, instance)?;
            let changed = tx
                .execute(
                    "DELETE FROM responses
                     WHERE survey_instance_id = ?1 AND question_id = ?2 AND iteration = ?3",
                    params![instance.as_str(), key.question_id.as_str(), key.iteration.get()],
                )
                .map_err(db_error)?;
            Ok(changed > 0)
        })
    }

    fn responses(
        &self,
        instance: &SurveyInstanceId,
    ) -> Result<Vec<QuestionResponse>, GatewayError> {
        self.with_tx(|tx| load_responses(tx, instance))
    }

    fn commit_submission(
        &self,
        instance: &SurveyInstanceId,
        responses: &[QuestionResponse],
    ) -> Result<SurveyInstance, GatewayError> {
        if let Some(foreign) =
            responses.iter().find(|response| &response.survey_instance_id != instance)
        {
            return Err(GatewayError::Invalid(format!(
                "response belongs to another instance: {}",
                foreign.survey_instance_id
            )));
        }
        self.with_tx(|tx| {
            ensure_editable(tx, instance)?;
            let mut updated = transition(tx, instance, SubmissionStatus::SubmitRequested)?;
            tx.execute(
                "UPDATE survey_instances SET submitted_at = ?1 WHERE id = ?2",
                params![updated.updated_at.as_unix_millis(), instance.as_str()],
            )
            .map_err(db_error)?;
            updated.submitted_at = Some(updated.updated_at);

            for stale in load_responses(tx, instance)? {
                let kept = responses.iter().any(|response| {
                    response.question_id == stale.question_id
                        && response.iteration == stale.iteration
                });
                if !kept {
                    tx.execute(
                        "DELETE FROM responses
                         WHERE survey_instance_id = ?1 AND question_id = ?2 AND iteration = ?3",
                        params![
                            instance.as_str(),
                            stale.question_id.as_str(),
                            stale.iteration.get()
                        ],
                    )
                    .map_err(db_error)?;
                }
            }
            for response in responses {
                upsert_response(tx, response)?;
            }
            Ok(updated)
        })
    }

    fn enqueue_transmission(
        &self,
        instance: &SurveyInstanceId,
        filename: &str,
    ) -> Result<TransmissionRecord, GatewayError> {
        self.with_tx(|tx| enqueue(tx, instance, filename))
    }

    fn commit_export(
        &self,
        instance: &SurveyInstanceId,
        filenames: &[String],
    ) -> Result<Vec<TransmissionRecord>, GatewayError> {
        self.with_tx(|tx| {
            let current = load_instance(tx, instance)?
                .ok_or_else(|| SqliteGatewayError::NotFound(format!("survey instance {instance}")))?
                .status;
            if !current.can_transition_to(SubmissionStatus::Submitted) {
                return Err(SqliteGatewayError::InvalidTransition {
                    instance: instance.to_string(),
                    from: current.as_str(),
                    to: SubmissionStatus::Submitted.as_str(),
                });
            }
            let mut records = Vec::with_capacity(filenames.len());
            for filename in filenames {
                records.push(enqueue(tx, instance, filename)?);
            }
            transition(tx, instance, SubmissionStatus::Submitted)?;
            Ok(records)
        })
    }

    fn transmissions_for_instance(
        &self,
        instance: &SurveyInstanceId,
    ) -> Result<Vec<TransmissionRecord>, GatewayError> {
        self.with_tx(|tx| {
            query_transmissions(tx, "WHERE survey_instance_id = ?1", params![instance.as_str()])
        })
    }

    fn pending_transmissions(&self) -> Result<Vec<TransmissionRecord>, GatewayError> {
        let [queued, in_progress, failed] = PENDING_STATUSES.map(TransmissionStatus::as_str);
        self.with_tx(|tx| {
            query_transmissions(
                tx,
                "WHERE status IN (?1, ?2, ?3)",
                params![queued, in_progress, failed],
            )
        })
    }

    fn update_transmission(
        &self,
        id: TransmissionId,
        status: TransmissionStatus,
        checksum: Option<&HashDigest>,
        error: Option<&str>,
    ) -> Result<TransmissionRecord, GatewayError> {
        self.with_tx(|tx| {
            let mut record = load_transmission(tx, id)?
                .ok_or_else(|| SqliteGatewayError::NotFound(format!("transmission {id}")))?;
            if status == TransmissionStatus::InProgress {
                record.attempts = record.attempts.saturating_add(1);
            }
            if let Some(checksum) = checksum {
                record.checksum = Some(checksum.clone());
            }
            record.status = status;
            record.last_error = error.map(str::to_string);
            record.updated_at = Timestamp::now();
            tx.execute(
                "UPDATE transmissions SET status = ?1, checksum = ?2, hash_algorithm = ?3,
                    attempts = ?4, last_error = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    record.status.as_str(),
                    record.checksum.as_ref().map(|digest| digest.value.as_str()),
                    record.checksum.as_ref().map(|digest| digest.algorithm.as_str()),
                    record.attempts,
                    record.last_error,
                    record.updated_at.as_unix_millis(),
                    raw_transmission_id(id)?,
                ],
            )
            .map_err(db_error)?;
            Ok(record)
        })
    }

    fn requeue_missing_file(
        &self,
        filename: &str,
    ) -> Result<Vec<TransmissionRecord>, GatewayError> {
        self.with_tx(|tx| {
            let now = Timestamp::now();
            let mut touched = query_transmissions(
                tx,
                "WHERE filename = ?1 AND status NOT IN (?2, ?3)",
                params![
                    filename,
                    TransmissionStatus::FormDeleted.as_str(),
                    TransmissionStatus::Skipped.as_str()
                ],
            )?;
            for record in &mut touched {
                record.status = TransmissionStatus::Queued;
                record.updated_at = now;
                tx.execute(
                    "UPDATE transmissions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![
                        record.status.as_str(),
                        now.as_unix_millis(),
                        raw_transmission_id(record.id)?
                    ],
                )
                .map_err(db_error)?;
                tx.execute(
                    "UPDATE survey_instances SET status = ?1, updated_at = ?2
                     WHERE id = ?3 AND status = ?4",
                    params![
                        SubmissionStatus::Submitted.as_str(),
                        now.as_unix_millis(),
                        record.survey_instance_id.as_str(),
                        SubmissionStatus::Uploaded.as_str(),
                    ],
                )
                .map_err(db_error)?;
            }
            Ok(touched)
        })
    }

    fn pending_transmission_count(&self, form: &FormId) -> Result<usize, GatewayError> {
        let [queued, in_progress, failed] = PENDING_STATUSES.map(TransmissionStatus::as_str);
        let count: i64 = self.with_tx(|tx| {
            tx.query_row(
                "SELECT COUNT(*) FROM transmissions
                 WHERE form_id = ?1 AND status IN (?2, ?3, ?4)",
                params![form.as_str(), queued, in_progress, failed],
                |row| row.get(0),
            )
            .map_err(db_error)
        })?;
        usize::try_from(count)
            .map_err(|_| GatewayError::Corrupt(format!("negative transmission count: {count}")))
    }

    fn readiness(&self) -> Result<(), GatewayError> {
        self.with_tx(|tx| {
            tx.query_row("SELECT 1", params![], |row| row.get::<_, i64>(0)).map_err(db_error)?;
            Ok(())
        })
    }
}

// ============================================================================
// SECTION: Row Mapping
// ============================================================================

/// Raw stored form row.
struct FormRow {
    /// Header JSON bytes.
    header_json: Vec<u8>,
    /// Definition JSON bytes, absent for header-only installs.
    definition_json: Option<Vec<u8>>,
    /// Stored definition hash.
    definition_hash: Option<String>,
    /// Stored hash algorithm label.
    hash_algorithm: Option<String>,
    /// Resource install flag.
    help_downloaded: bool,
    /// Upstream deletion flag.
    deleted: bool,
    /// Install time (unix millis).
    installed_at: i64,
}

/// Maps a `forms` row.
fn map_form_row(row: &Row<'_>) -> rusqlite::Result<FormRow> {
    Ok(FormRow {
        header_json: row.get(0)?,
        definition_json: row.get(1)?,
        definition_hash: row.get(2)?,
        hash_algorithm: row.get(3)?,
        help_downloaded: row.get(4)?,
        deleted: row.get(5)?,
        installed_at: row.get(6)?,
    })
}

impl FormRow {
    /// Decodes the row, verifying the definition hash.
    fn into_form(self) -> Result<InstalledForm, SqliteGatewayError> {
        let header: FormHeader = serde_json::from_slice(&self.header_json)
            .map_err(|err| SqliteGatewayError::Corrupt(format!("form header: {err}")))?;
        let definition = match self.definition_json {
            None => None,
            Some(bytes) => {
                let algorithm = parse_hash_algorithm(self.hash_algorithm.as_deref())?;
                let expected = HashDigest {
                    algorithm,
                    value: self.definition_hash.unwrap_or_default(),
                };
                if !expected.matches(&bytes) {
                    return Err(SqliteGatewayError::Corrupt(format!(
                        "definition hash mismatch for form {}",
                        header.id
                    )));
                }
                let definition = FormDefinition::from_json(&bytes)
                    .map_err(|err| SqliteGatewayError::Corrupt(err.to_string()))?;
                Some(
                    Form::from_definition(definition)
                        .map_err(|err| SqliteGatewayError::Corrupt(err.to_string()))?,
                )
            }
        };
        Ok(InstalledForm {
            header,
            definition,
            help_downloaded: self.help_downloaded,
            deleted: self.deleted,
            installed_at: Timestamp::from_unix_millis(self.installed_at),
        })
    }
}

/// Raw stored survey instance row.
struct InstanceRow {
    /// Instance identifier.
    id: String,
    /// Form identifier.
    form_id: String,
    /// Form version label.
    form_version: String,
    /// Status label.
    status: String,
    /// Creation time.
    created_at: i64,
    /// Submission time.
    submitted_at: Option<i64>,
    /// Last update time.
    updated_at: i64,
}

/// Maps a `survey_instances` row selected with [`INSTANCE_COLUMNS`].
fn map_instance_row(row: &Row<'_>) -> rusqlite::Result<InstanceRow> {
    Ok(InstanceRow {
        id: row.get(0)?,
        form_id: row.get(1)?,
        form_version: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        submitted_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl InstanceRow {
    /// Validates labels and converts to the domain type.
    fn into_instance(self) -> Result<SurveyInstance, SqliteGatewayError> {
        let status = SubmissionStatus::parse(&self.status).ok_or_else(|| {
            SqliteGatewayError::Corrupt(format!("unknown submission status: {}", self.status))
        })?;
        let form_version = FormVersion::parse(&self.form_version)
            .map_err(|err| SqliteGatewayError::Corrupt(err.to_string()))?;
        Ok(SurveyInstance {
            id: SurveyInstanceId::new(self.id),
            form_id: FormId::new(self.form_id),
            form_version,
            status,
            created_at: Timestamp::from_unix_millis(self.created_at),
            submitted_at: self.submitted_at.map(Timestamp::from_unix_millis),
            updated_at: Timestamp::from_unix_millis(self.updated_at),
        })
    }
}

/// Raw stored response row.
struct ResponseRow {
    /// Row identity.
    id: i64,
    /// Owning instance.
    survey_instance_id: String,
    /// Question identifier.
    question_id: String,
    /// Raw iteration.
    iteration: i64,
    /// Encoded value.
    value: String,
    /// Response type label.
    response_type: String,
    /// Media filename.
    filename: Option<String>,
    /// Export flag.
    include: bool,
}

/// Maps a `responses` row selected with [`RESPONSE_COLUMNS`].
fn map_response_row(row: &Row<'_>) -> rusqlite::Result<ResponseRow> {
    Ok(ResponseRow {
        id: row.get(0)?,
        survey_instance_id: row.get(1)?,
        question_id: row.get(2)?,
        iteration: row.get(3)?,
        value: row.get(4)?,
        response_type: row.get(5)?,
        filename: row.get(6)?,
        include: row.get(7)?,
    })
}

impl ResponseRow {
    /// Validates labels and converts to the domain type.
    fn into_response(self) -> Result<QuestionResponse, SqliteGatewayError> {
        let response_type = ResponseType::parse(&self.response_type).ok_or_else(|| {
            SqliteGatewayError::Corrupt(format!("unknown response type: {}", self.response_type))
        })?;
        let iteration = Iteration::try_from(self.iteration)
            .map_err(|err| SqliteGatewayError::Corrupt(err.to_string()))?;
        let row_id = u64::try_from(self.id)
            .map_err(|_| SqliteGatewayError::Corrupt(format!("invalid response id {}", self.id)))?;
        Ok(QuestionResponse {
            row_id: Some(row_id),
            survey_instance_id: SurveyInstanceId::new(self.survey_instance_id),
            question_id: QuestionId::new(self.question_id),
            iteration,
            value: self.value,
            response_type,
            filename: self.filename,
            include: self.include,
        })
    }
}

/// Raw stored transmission row.
struct TransmissionRow {
    /// Row identity.
    id: i64,
    /// Owning instance.
    survey_instance_id: String,
    /// Form of the owning instance.
    form_id: String,
    /// Artifact filename.
    filename: String,
    /// Status label.
    status: String,
    /// Checksum hex.
    checksum: Option<String>,
    /// Checksum algorithm label.
    hash_algorithm: Option<String>,
    /// Attempt counter.
    attempts: i64,
    /// Last error message.
    last_error: Option<String>,
    /// Enqueue time.
    created_at: i64,
    /// Last update time.
    updated_at: i64,
}

/// Maps a `transmissions` row selected with [`TRANSMISSION_COLUMNS`].
fn map_transmission_row(row: &Row<'_>) -> rusqlite::Result<TransmissionRow> {
    Ok(TransmissionRow {
        id: row.get(0)?,
        survey_instance_id: row.get(1)?,
        form_id: row.get(2)?,
        filename: row.get(3)?,
        status: row.get(4)?,
        checksum: row.get(5)?,
        hash_algorithm: row.get(6)?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl TransmissionRow {
    /// Validates labels and converts to the domain type.
    fn into_record(self) -> Result<TransmissionRecord, SqliteGatewayError> {
        let id = u64::try_from(self.id)
            .ok()
            .and_then(TransmissionId::from_raw)
            .ok_or_else(|| {
                SqliteGatewayError::Corrupt(format!("invalid transmission id {}", self.id))
            })?;
        let status = TransmissionStatus::parse(&self.status).ok_or_else(|| {
            SqliteGatewayError::Corrupt(format!("unknown transmission status: {}", self.status))
        })?;
        let checksum = match self.checksum {
            Some(value) => Some(HashDigest {
                algorithm: parse_hash_algorithm(self.hash_algorithm.as_deref())?,
                value,
            }),
            None => None,
        };
        let attempts = u32::try_from(self.attempts).map_err(|_| {
            SqliteGatewayError::Corrupt(format!("invalid attempt count {}", self.attempts))
        })?;
        Ok(TransmissionRecord {
            id,
            survey_instance_id: SurveyInstanceId::new(self.survey_instance_id),
            form_id: FormId::new(self.form_id),
            filename: self.filename,
            status,
            checksum,
            attempts,
            last_error: self.last_error,
            created_at: Timestamp::from_unix_millis(self.created_at),
            updated_at: Timestamp::from_unix_millis(self.updated_at),
        })
    }
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Loads one survey instance.
fn load_instance(
    tx: &Connection,
    id: &SurveyInstanceId,
) -> Result<Option<SurveyInstance>, SqliteGatewayError> {
    let sql = format!("SELECT {INSTANCE_COLUMNS} FROM survey_instances WHERE id = ?1");
    tx.query_row(&sql, params![id.as_str()], map_instance_row)
        .optional()
        .map_err(db_error)?
        .map(InstanceRow::into_instance)
        .transpose()
}

/// Applies a checked status transition.
fn transition(
    tx: &Connection,
    id: &SurveyInstanceId,
    status: SubmissionStatus,
) -> Result<SurveyInstance, SqliteGatewayError> {
    let mut instance = load_instance(tx, id)?
        .ok_or_else(|| SqliteGatewayError::NotFound(format!("survey instance {id}")))?;
    if !instance.status.can_transition_to(status) {
        return Err(SqliteGatewayError::InvalidTransition {
            instance: id.to_string(),
            from: instance.status.as_str(),
            to: status.as_str(),
        });
    }
    instance.status = status;
    instance.updated_at = Timestamp::now();
    tx.execute(
        "UPDATE survey_instances SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), instance.updated_at.as_unix_millis(), id.as_str()],
    )
    .map_err(db_error)?;
    Ok(instance)
}

/// Fails unless the instance exists and its responses are still editable.
fn ensure_editable(tx: &Connection, id: &SurveyInstanceId) -> Result<(), SqliteGatewayError> {
    let instance = load_instance(tx, id)?
        .ok_or_else(|| SqliteGatewayError::NotFound(format!("survey instance {id}")))?;
    if instance.status.is_editable() {
        return Ok(());
    }
    Err(SqliteGatewayError::Frozen {
        instance: id.to_string(),
        status: instance.status.as_str(),
    })
}

/// Loads every response of an instance in key order.
fn load_responses(
    tx: &Connection,
    instance: &SurveyInstanceId,
) -> Result<Vec<QuestionResponse>, SqliteGatewayError> {
    let sql = format!(
        "SELECT {RESPONSE_COLUMNS} FROM responses WHERE survey_instance_id = ?1
         ORDER BY question_id, iteration"
    );
    let mut stmt = tx.prepare(&sql).map_err(db_error)?;
    let rows = stmt.query_map(params![instance.as_str()], map_response_row).map_err(db_error)?;
    let responses = rows.map(|row| row.map_err(db_error)?.into_response()).collect();
    responses
}

/// Upserts a response on its natural key, keeping the row identity.
fn upsert_response(
    tx: &Connection,
    response: &QuestionResponse,
) -> Result<QuestionResponse, SqliteGatewayError> {
    let row_id: i64 = tx
        .query_row(
            "INSERT INTO responses (
                survey_instance_id, question_id, iteration, value, response_type, filename, include
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (survey_instance_id, question_id, iteration) DO UPDATE SET
                value = excluded.value,
                response_type = excluded.response_type,
                filename = excluded.filename,
                include = excluded.include
             RETURNING id",
            params![
                response.survey_instance_id.as_str(),
                response.question_id.as_str(),
                response.iteration.get(),
                response.value,
                response.response_type.as_str(),
                response.filename,
                response.include,
            ],
            |row| row.get(0),
        )
        .map_err(db_error)?;
    let mut stored = response.clone();
    stored.row_id = Some(
        u64::try_from(row_id)
            .map_err(|_| SqliteGatewayError::Corrupt(format!("invalid response id {row_id}")))?,
    );
    Ok(stored)
}

/// Runs a transmission query with a `WHERE` clause, in enqueue order.
fn query_transmissions(
    tx: &Connection,
    filter: &str,
    params: impl Params,
) -> Result<Vec<TransmissionRecord>, SqliteGatewayError> {
    let sql = format!("SELECT {TRANSMISSION_COLUMNS} FROM transmissions {filter} ORDER BY id");
    let mut stmt = tx.prepare(&sql).map_err(db_error)?;
    let rows = stmt.query_map(params, map_transmission_row).map_err(db_error)?;
    let records = rows.map(|row| row.map_err(db_error)?.into_record()).collect();
    records
}

/// Loads one transmission by id.
fn load_transmission(
    tx: &Connection,
    id: TransmissionId,
) -> Result<Option<TransmissionRecord>, SqliteGatewayError> {
    Ok(query_transmissions(tx, "WHERE id = ?1", params![raw_transmission_id(id)?])?.pop())
}

/// Enqueues a transmission unless the `(instance, filename)` pair exists.
fn enqueue(
    tx: &Connection,
    instance: &SurveyInstanceId,
    filename: &str,
) -> Result<TransmissionRecord, SqliteGatewayError> {
    let existing = query_transmissions(
        tx,
        "WHERE survey_instance_id = ?1 AND filename = ?2",
        params![instance.as_str(), filename],
    )?;
    if let Some(record) = existing.into_iter().next() {
        return Ok(record);
    }
    let form_id = load_instance(tx, instance)?
        .map(|row| row.form_id)
        .ok_or_else(|| SqliteGatewayError::NotFound(format!("survey instance {instance}")))?;
    let now = Timestamp::now().as_unix_millis();
    tx.execute(
        "INSERT INTO transmissions (
            survey_instance_id, form_id, filename, status, attempts, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![
            instance.as_str(),
            form_id.as_str(),
            filename,
            TransmissionStatus::Queued.as_str(),
            now
        ],
    )
    .map_err(db_error)?;
    let raw = u64::try_from(tx.last_insert_rowid()).ok().and_then(TransmissionId::from_raw);
    let id = raw.ok_or_else(|| SqliteGatewayError::Corrupt("invalid transmission id".to_string()))?;
    load_transmission(tx, id)?
        .ok_or_else(|| SqliteGatewayError::Corrupt(format!("transmission {id} vanished")))
}

/// Converts a transmission id to its `SQLite` integer form.
fn raw_transmission_id(id: TransmissionId) -> Result<i64, SqliteGatewayError> {
    i64::try_from(id.get())
        .map_err(|_| SqliteGatewayError::Invalid(format!("transmission id out of range: {id}")))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serializes and hashes a form definition, enforcing the size limit.
fn encode_definition(form: &Form) -> Result<(Vec<u8>, HashDigest), SqliteGatewayError> {
    let bytes = serde_json::to_vec(form.definition())
        .map_err(|err| SqliteGatewayError::Invalid(err.to_string()))?;
    if bytes.len() > MAX_DEFINITION_BYTES {
        return Err(SqliteGatewayError::TooLarge {
            max_bytes: MAX_DEFINITION_BYTES,
            actual_bytes: bytes.len(),
        });
    }
    let digest = HashDigest::of(&bytes);
    Ok((bytes, digest))
}

/// Parses a stored hash algorithm label.
fn parse_hash_algorithm(label: Option<&str>) -> Result<HashAlgorithm, SqliteGatewayError> {
    let label =
        label.ok_or_else(|| SqliteGatewayError::Corrupt("missing hash algorithm".to_string()))?;
    HashAlgorithm::parse(label).ok_or_else(|| {
        SqliteGatewayError::Corrupt(format!("unsupported hash algorithm: {label}"))
    })
}

/// Ensures the parent directory for the database exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteGatewayError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteGatewayError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteGatewayError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteGatewayError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteGatewayError::Invalid("store path must not be empty".to_string()));
    }
    if path.display().to_string().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteGatewayError::Invalid("store path exceeds length limit".to_string()));
    }
    if path.components().any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(SqliteGatewayError::Invalid(
            "store path contains an overlong component".to_string(),
        ));
    }
    if path.is_dir() {
        return Err(SqliteGatewayError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with durable defaults.
fn open_connection(config: &SqliteGatewayConfig) -> Result<Connection, SqliteGatewayError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    Ok(connection)
}

/// Initializes the schema or validates the stored version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteGatewayError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS survey_groups (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    viewed INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS forms (
                    id TEXT PRIMARY KEY,
                    version TEXT NOT NULL,
                    header_json BLOB NOT NULL,
                    definition_json BLOB,
                    definition_hash TEXT,
                    hash_algorithm TEXT,
                    help_downloaded INTEGER NOT NULL,
                    deleted INTEGER NOT NULL,
                    installed_at INTEGER NOT NULL
                );
                CREATE TABLE IF NOT EXISTS survey_instances (
                    id TEXT PRIMARY KEY,
                    form_id TEXT NOT NULL,
                    form_version TEXT NOT NULL,
                    status TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    submitted_at INTEGER,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_survey_instances_status
                    ON survey_instances (status, created_at, id);
                CREATE TABLE IF NOT EXISTS responses (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    survey_instance_id TEXT NOT NULL
                        REFERENCES survey_instances(id) ON DELETE CASCADE,
                    question_id TEXT NOT NULL,
                    iteration INTEGER NOT NULL,
                    value TEXT NOT NULL,
                    response_type TEXT NOT NULL,
                    filename TEXT,
                    include INTEGER NOT NULL,
                    UNIQUE (survey_instance_id, question_id, iteration)
                );
                CREATE TABLE IF NOT EXISTS transmissions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    survey_instance_id TEXT NOT NULL REFERENCES survey_instances(id),
                    form_id TEXT NOT NULL,
                    filename TEXT NOT NULL,
                    status TEXT NOT NULL,
                    checksum TEXT,
                    hash_algorithm TEXT,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    UNIQUE (survey_instance_id, filename)
                );
                CREATE INDEX IF NOT EXISTS idx_transmissions_status
                    ON transmissions (status, form_id);
                CREATE INDEX IF NOT EXISTS idx_transmissions_filename
                    ON transmissions (filename);",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteGatewayError::VersionMismatch(format!(
                "unsupported schema version {value} (expected {SCHEMA_VERSION})"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}

// crates/survey-sync-config/src/config.rs
// ============================================================================
// Module: Survey Sync Configuration
// Description: Configuration loading and validation for the sync agent.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: survey-sync-core, survey-sync-store-sqlite, serde, toml, url
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The path comes from the caller, then the `SURVEY_SYNC_CONFIG` environment
//! variable, then `survey-sync.toml` in the working directory. Missing or
//! invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use survey_sync_core::DeviceId;
use survey_sync_core::PipelineConfig;
use survey_sync_core::RetryPolicy;
use survey_sync_store_sqlite::SqliteGatewayConfig;
use survey_sync_store_sqlite::SqliteJournalMode;
use survey_sync_store_sqlite::SqliteSyncMode;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "survey-sync.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "SURVEY_SYNC_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum device identifier length.
const MAX_DEVICE_ID_LENGTH: usize = 128;
/// Maximum per-request timeout (ms).
const MAX_TIMEOUT_MS: u64 = 300_000;
/// Maximum response body cap in bytes.
const MAX_RESPONSE_BYTES_LIMIT: usize = 256 * 1024 * 1024;
/// Maximum worker count.
const MAX_WORKERS: usize = 16;
/// Maximum attempts per network call.
const MAX_RETRY_ATTEMPTS: u32 = 10;
/// Maximum retry backoff unit (ms).
const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Survey sync agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SurveySyncConfig {
    /// Device identity.
    pub device: DeviceConfig,
    /// Form server endpoint.
    pub server: ServerConfig,
    /// Local storage layout.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Artifact object storage.
    pub upload: UploadConfig,
    /// Transmission pass tuning.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Audit event output.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl SurveySyncConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config = Self::from_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration text without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the TOML is malformed.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()?;
        self.server.validate()?;
        self.storage.validate()?;
        self.upload.validate()?;
        self.sync.validate()?;
        self.audit.validate()
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.device.id.trim())
    }

    /// Returns the `SQLite` gateway configuration.
    #[must_use]
    pub fn gateway_config(&self) -> SqliteGatewayConfig {
        SqliteGatewayConfig {
            path: self.storage.store_path.clone(),
            busy_timeout_ms: self.storage.busy_timeout_ms,
            journal_mode: self.storage.journal_mode,
            sync_mode: self.storage.sync_mode,
        }
    }

    /// Returns the transmission pipeline configuration.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.sync.workers,
            retry: RetryPolicy {
                attempts: self.sync.retry_attempts,
                backoff: Duration::from_millis(self.sync.retry_backoff_ms),
            },
            min_free_bytes: self.storage.min_free_bytes,
        }
    }
}

// ============================================================================
// SECTION: Device
// ============================================================================

/// Device identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device identifier reported to the server.
    pub id: String,
}

impl DeviceConfig {
    /// Validates the device identifier.
    fn validate(&self) -> Result<(), ConfigError> {
        let trimmed = self.id.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Invalid("device.id must be set".to_string()));
        }
        if trimmed.len() > MAX_DEVICE_ID_LENGTH {
            return Err(ConfigError::Invalid("device.id exceeds max length".to_string()));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ConfigError::Invalid(
                "device.id must not contain control characters".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Form server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the form server REST API.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum accepted response body size.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Allow non-TLS endpoints (explicit opt-in).
    #[serde(default)]
    pub allow_http: bool,
}

impl ServerConfig {
    /// Validates the server endpoint and limits.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint("server.base_url", &self.base_url, self.allow_http)?;
        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "server.timeout_ms out of range: {} (max {MAX_TIMEOUT_MS})",
                self.timeout_ms
            )));
        }
        if self.max_response_bytes == 0 || self.max_response_bytes > MAX_RESPONSE_BYTES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "server.max_response_bytes out of range: {} (max {MAX_RESPONSE_BYTES_LIMIT})",
                self.max_response_bytes
            )));
        }
        Ok(())
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Returns the default request timeout.
const fn default_timeout_ms() -> u64 {
    30_000
}

/// Returns the default response body cap.
const fn default_max_response_bytes() -> usize {
    32 * 1024 * 1024
}

// ============================================================================
// SECTION: Storage
// ============================================================================

/// Local storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// `SQLite` busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Directory for submitted-data archives.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory for captured media.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,
    /// Directory for extracted form resources.
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,
    /// Minimum free bytes required before a pass starts.
    #[serde(default = "default_min_free_bytes")]
    pub min_free_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
            data_dir: default_data_dir(),
            media_dir: default_media_dir(),
            resource_dir: default_resource_dir(),
            min_free_bytes: default_min_free_bytes(),
        }
    }
}

impl StorageConfig {
    /// Validates storage paths.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_field("storage.store_path", &self.store_path)?;
        validate_path_field("storage.data_dir", &self.data_dir)?;
        validate_path_field("storage.media_dir", &self.media_dir)?;
        validate_path_field("storage.resource_dir", &self.resource_dir)?;
        if self.data_dir == self.media_dir || self.data_dir == self.resource_dir {
            return Err(ConfigError::Invalid(
                "storage.data_dir must differ from media_dir and resource_dir".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default database path.
fn default_store_path() -> PathBuf {
    PathBuf::from("survey-sync.db")
}

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Returns the default data archive directory.
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Returns the default media directory.
fn default_media_dir() -> PathBuf {
    PathBuf::from("media")
}

/// Returns the default resource directory.
fn default_resource_dir() -> PathBuf {
    PathBuf::from("resources")
}

/// Returns the default free-space threshold.
const fn default_min_free_bytes() -> u64 {
    survey_sync_core::runtime::DEFAULT_MIN_FREE_BYTES
}

// ============================================================================
// SECTION: Upload
// ============================================================================

/// Artifact object storage configuration (S3 compatible).
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Bucket name.
    pub bucket: String,
    /// Optional region (defaults to environment).
    #[serde(default)]
    pub region: Option<String>,
    /// Optional S3-compatible endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Optional key prefix inside the bucket.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Force path-style addressing.
    #[serde(default)]
    pub force_path_style: bool,
    /// Allow non-TLS endpoints (explicit opt-in).
    #[serde(default)]
    pub allow_http: bool,
}

impl UploadConfig {
    /// Validates object storage settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("upload.bucket must be set".to_string()));
        }
        if let Some(endpoint) = &self.endpoint {
            validate_endpoint("upload.endpoint", endpoint, self.allow_http)?;
        }
        if let Some(prefix) = &self.prefix {
            validate_key_prefix(prefix)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Sync
// ============================================================================

/// Transmission pass tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Instances processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Attempts per network call, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Retry backoff unit in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl SyncConfig {
    /// Validates pass tuning bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::Invalid(format!(
                "sync.workers out of range: {} (max {MAX_WORKERS})",
                self.workers
            )));
        }
        if self.retry_attempts == 0 || self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "sync.retry_attempts out of range: {} (max {MAX_RETRY_ATTEMPTS})",
                self.retry_attempts
            )));
        }
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "sync.retry_backoff_ms exceeds {MAX_RETRY_BACKOFF_MS}"
            )));
        }
        Ok(())
    }
}

/// Returns the default worker count.
const fn default_workers() -> usize {
    2
}

/// Returns the default attempts per call.
const fn default_retry_attempts() -> u32 {
    3
}

/// Returns the default backoff unit.
const fn default_retry_backoff_ms() -> u64 {
    500
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit sink selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// JSON lines on stderr.
    #[default]
    Stderr,
    /// JSON lines appended to a file.
    File,
    /// Discard events.
    None,
}

/// Audit output configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Sink kind.
    #[serde(default)]
    pub sink: AuditSinkKind,
    /// Log file path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AuditConfig {
    /// Validates sink and path pairing.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (AuditSinkKind::File, None) => {
                Err(ConfigError::Invalid("audit.path is required for the file sink".to_string()))
            }
            (AuditSinkKind::File, Some(path)) => validate_path_field("audit.path", path),
            (AuditSinkKind::Stderr | AuditSinkKind::None, Some(_)) => Err(ConfigError::Invalid(
                "audit.path is only valid for the file sink".to_string(),
            )),
            (AuditSinkKind::Stderr | AuditSinkKind::None, None) => Ok(()),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a configured path against length constraints.
fn validate_path_field(field: &str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates an endpoint URL and its scheme.
fn validate_endpoint(field: &str, value: &str, allow_http: bool) -> Result<(), ConfigError> {
    let url = Url::parse(value.trim())
        .map_err(|err| ConfigError::Invalid(format!("{field} is not a valid url: {err}")))?;
    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => {
            return Err(ConfigError::Invalid(format!("{field} uses http:// without allow_http")));
        }
        other => {
            return Err(ConfigError::Invalid(format!("{field} has unsupported scheme: {other}")));
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::Invalid(format!("{field} must include a host")));
    }
    Ok(())
}

/// Validates the object key prefix.
fn validate_key_prefix(value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid("upload.prefix must be non-empty".to_string()));
    }
    if trimmed.contains('\\') {
        return Err(ConfigError::Invalid("upload.prefix must not contain backslashes".to_string()));
    }
    if trimmed.starts_with('/') {
        return Err(ConfigError::Invalid("upload.prefix must be relative".to_string()));
    }
    if trimmed.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(ConfigError::Invalid(
            "upload.prefix must not contain dot segments".to_string(),
        ));
    }
    Ok(())
}

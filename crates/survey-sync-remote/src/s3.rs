// crates/survey-sync-remote/src/s3.rs
// ============================================================================
// Module: S3 Artifact Store
// Description: Checksum-addressed artifact upload to S3-compatible storage.
// Purpose: Implement `ArtifactStore` with idempotent, validated puts.
// Dependencies: survey-sync-core, aws-config, aws-sdk-s3, tokio
// ============================================================================

//! ## Overview
//! [`S3ArtifactStore`] uploads survey artifacts under `{prefix}{kind}/{file}`
//! keys. Each object carries its SHA-256 digest as `sha256` metadata; an
//! upload whose key already holds the same digest is acknowledged without a
//! second put. Public artifacts (media) are written with a public-read ACL.
//! Invariants:
//! - Keys are relative, `/`-separated, and never traverse upward.
//! - The caller's checksum must match the bytes before anything is sent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use survey_sync_config::UploadConfig;
use survey_sync_core::ArtifactStore;
use survey_sync_core::HashDigest;
use survey_sync_core::NetworkError;
use survey_sync_core::UploadAck;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;
use tokio::runtime::RuntimeFlavor;

use crate::RemoteError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Object metadata key holding the hex SHA-256 digest.
const CHECKSUM_METADATA_KEY: &str = "sha256";
/// Maximum length of a single key segment.
const MAX_KEY_SEGMENT_LENGTH: usize = 255;
/// Maximum total key length.
const MAX_KEY_LENGTH: usize = 1024;

// ============================================================================
// SECTION: Runtime Helpers
// ============================================================================

/// Blocks on an object-store future using a compatible runtime.
fn block_on_with_runtime<F, T>(runtime: &Runtime, future: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, NetworkError>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        if matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) {
            return tokio::task::block_in_place(|| handle.block_on(future));
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        std::thread::spawn(move || {
            let result = Runtime::new()
                .map_err(|err| NetworkError::Transient(err.to_string()))
                .and_then(|runtime| runtime.block_on(future));
            let _ = tx.send(result);
        });
        return rx.recv().unwrap_or_else(|_| {
            Err(NetworkError::Transient("object store thread join failed".to_string()))
        });
    }

    runtime.block_on(future)
}

// ============================================================================
// SECTION: Object Client
// ============================================================================

/// Object put request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PutObject {
    /// Full object key including prefix.
    pub key: String,
    /// Object bytes.
    pub bytes: Vec<u8>,
    /// MIME type.
    pub content_type: String,
    /// Hex SHA-256 digest stored as metadata.
    pub checksum: String,
    /// Whether the object is world-readable.
    pub public: bool,
}

/// Minimal object-store client abstraction.
pub(crate) trait ObjectClient: Send + Sync {
    /// Returns the stored checksum metadata, or `None` when the key is absent.
    fn stored_checksum(&self, key: &str) -> Result<Option<String>, NetworkError>;

    /// Writes one object.
    fn put(&self, object: PutObject) -> Result<(), NetworkError>;
}

/// S3-backed object client.
struct S3ObjectClient {
    /// Underlying S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Tokio runtime for blocking S3 operations.
    runtime: Option<Arc<Runtime>>,
}

impl Drop for S3ObjectClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = std::thread::spawn(move || drop(runtime));
        }
    }
}

impl S3ObjectClient {
    /// Builds an S3 client from upload configuration.
    fn new(config: &UploadConfig) -> Result<Self, RemoteError> {
        let runtime = Runtime::new().map_err(|err| RemoteError::Init(err.to_string()))?;
        let region = config.region.clone();
        let endpoint = config.endpoint.clone();
        let shared_config = block_on_with_runtime(&runtime, async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            if let Some(endpoint) = endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            Ok(loader.load().await)
        })
        .map_err(|err| RemoteError::Init(err.to_string()))?;
        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }
        Ok(Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: config.bucket.clone(),
            runtime: Some(Arc::new(runtime)),
        })
    }

    /// Returns the runtime or an error if shut down.
    fn runtime(&self) -> Result<&Runtime, NetworkError> {
        self.runtime
            .as_ref()
            .map(AsRef::as_ref)
            .ok_or_else(|| NetworkError::Transient("object store runtime closed".to_string()))
    }
}

impl ObjectClient for S3ObjectClient {
    fn stored_checksum(&self, key: &str) -> Result<Option<String>, NetworkError> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();
        block_on_with_runtime(self.runtime()?, async move {
            match client.head_object().bucket(bucket).key(key).send().await {
                Ok(output) => Ok(output
                    .metadata()
                    .and_then(|metadata| metadata.get(CHECKSUM_METADATA_KEY))
                    .cloned()),
                Err(err) => {
                    if err.as_service_error().is_some_and(|service| service.is_not_found()) {
                        Ok(None)
                    } else {
                        Err(classify_sdk_error(&err))
                    }
                }
            }
        })
    }

    fn put(&self, object: PutObject) -> Result<(), NetworkError> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        block_on_with_runtime(self.runtime()?, async move {
            let mut request = client
                .put_object()
                .bucket(bucket)
                .key(object.key)
                .content_type(object.content_type)
                .metadata(CHECKSUM_METADATA_KEY, object.checksum)
                .body(ByteStream::from(object.bytes));
            if object.public {
                request = request.acl(ObjectCannedAcl::PublicRead);
            }
            request.send().await.map_err(|err| classify_sdk_error(&err))?;
            Ok(())
        })
    }
}

/// Maps an SDK failure onto a [`NetworkError`].
fn classify_sdk_error<E>(err: &SdkError<E, HttpResponse>) -> NetworkError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(err).to_string();
    match err {
        SdkError::ConstructionFailure(_) => NetworkError::Invalid(message),
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            // A missing bucket is a deployment fault, never a deleted form.
            match status {
                408 | 429 | 500 ..= 599 => NetworkError::Transient(message),
                _ => NetworkError::Rejected {
                    status,
                    message,
                },
            }
        }
        _ => NetworkError::Transient(message),
    }
}

// ============================================================================
// SECTION: Artifact Store
// ============================================================================

/// S3-compatible [`ArtifactStore`].
pub struct S3ArtifactStore {
    /// Object client implementation.
    client: Arc<dyn ObjectClient>,
    /// Normalized key prefix ending in `/`, or empty.
    prefix: String,
}

impl S3ArtifactStore {
    /// Creates a store from upload configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the prefix is invalid or the client cannot
    /// be initialized.
    pub fn new(config: &UploadConfig) -> Result<Self, RemoteError> {
        let prefix = normalize_prefix(config.prefix.as_deref().unwrap_or(""))?;
        let client = Arc::new(S3ObjectClient::new(config)?);
        Ok(Self {
            client,
            prefix,
        })
    }

    /// Creates a store from a custom object client.
    #[cfg(test)]
    pub(crate) fn with_client(
        client: Arc<dyn ObjectClient>,
        prefix: &str,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            client,
            prefix: normalize_prefix(prefix)?,
        })
    }

    /// Returns the full object key for a destination key.
    fn object_key(&self, destination_key: &str) -> Result<String, NetworkError> {
        validate_relative_key(destination_key).map_err(NetworkError::Invalid)?;
        let key = format!("{}{destination_key}", self.prefix);
        if key.len() > MAX_KEY_LENGTH {
            return Err(NetworkError::Invalid(format!("object key too long: {}", key.len())));
        }
        Ok(key)
    }
}

impl ArtifactStore for S3ArtifactStore {
    fn upload_artifact(
        &self,
        destination_key: &str,
        bytes: &[u8],
        checksum: &HashDigest,
        content_type: &str,
        public: bool,
    ) -> Result<UploadAck, NetworkError> {
        let key = self.object_key(destination_key)?;
        if !checksum.matches(bytes) {
            return Err(NetworkError::Invalid(format!(
                "checksum mismatch for {destination_key}: expected {checksum}, got {}",
                HashDigest::of(bytes)
            )));
        }
        if self.client.stored_checksum(&key)?.as_deref() == Some(checksum.value.as_str()) {
            return Ok(UploadAck {
                already_present: true,
            });
        }
        self.client.put(PutObject {
            key,
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
            checksum: checksum.value.clone(),
            public,
        })?;
        Ok(UploadAck {
            already_present: false,
        })
    }
}

// ============================================================================
// SECTION: Key Validation
// ============================================================================

/// Normalizes a bucket prefix to empty or `segment/.../`.
fn normalize_prefix(prefix: &str) -> Result<String, RemoteError> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    validate_relative_key(trimmed).map_err(RemoteError::Invalid)?;
    Ok(format!("{trimmed}/"))
}

/// Validates a relative `/`-separated object key.
fn validate_relative_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("object key is empty".to_string());
    }
    if key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(format!("object key must be relative: {key}"));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(format!("object key has an invalid segment: {key}"));
        }
        if segment.len() > MAX_KEY_SEGMENT_LENGTH {
            return Err(format!("object key segment too long: {key}"));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

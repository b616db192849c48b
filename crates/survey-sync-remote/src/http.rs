// crates/survey-sync-remote/src/http.rs
// ============================================================================
// Module: HTTP Form Server
// Description: Blocking REST client for form distribution and notifications.
// Purpose: Implement `FormServer` over HTTP with bounded, classified responses.
// Dependencies: survey-sync-core, reqwest, serde, url
// ============================================================================

//! ## Overview
//! [`HttpFormServer`] maps the form server REST API onto the core
//! [`FormServer`] trait.
//!
//! Routes, relative to the configured base URL:
//! - `GET forms/{id}/header?deviceId=` returns one form header.
//! - `GET forms?deviceId=` returns the headers assigned to the device.
//! - `GET forms/{id}/archive` and `GET resources/{id}/archive` return zip bytes.
//! - `POST notifications` announces an uploaded artifact.
//! - `GET devicenotification?deviceId=&formId=..` returns missing files and
//!   deleted forms.
//!
//! Invariants:
//! - Redirects are never followed.
//! - Response bodies are capped at the configured byte limit.
//! - 403 means the device lacks an assignment, 404/410 mean the resource is
//!   gone, and 408/429/5xx or connection failures are transient.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use survey_sync_config::ServerConfig;
use survey_sync_core::DeviceId;
use survey_sync_core::FormHeader;
use survey_sync_core::FormId;
use survey_sync_core::FormServer;
use survey_sync_core::NetworkError;
use survey_sync_core::NotifyAction;
use survey_sync_core::PendingFiles;
use survey_sync_core::ResourceId;
use url::Url;

use crate::RemoteError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum bytes of an error body echoed into [`NetworkError`] messages.
const MAX_ERROR_SNIPPET_BYTES: u64 = 512;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Upload notification request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationBody<'a> {
    /// Notification action label.
    action: &'static str,
    /// Form the artifact belongs to.
    form_id: &'a FormId,
    /// Uploaded filename.
    filename: &'a str,
    /// Reporting device.
    device_id: &'a str,
}

/// Device notification response body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingFilesBody {
    /// Filenames the server never received.
    #[serde(default)]
    missing_files: Vec<String>,
    /// Forms deleted upstream.
    #[serde(default)]
    deleted_forms: Vec<FormId>,
}

// ============================================================================
// SECTION: HTTP Form Server
// ============================================================================

/// Blocking HTTP client for the form server.
#[derive(Debug, Clone)]
pub struct HttpFormServer {
    /// HTTP client with redirects disabled.
    client: Client,
    /// Base URL every route is resolved against.
    base_url: Url,
    /// Maximum accepted response body size.
    max_response_bytes: usize,
}

impl HttpFormServer {
    /// Builds a client from server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the base URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &ServerConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| RemoteError::Init(err.to_string()))?;
        Self::with_client(client, &config.base_url, config.max_response_bytes)
    }

    /// Builds a server from a caller-provided HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the base URL cannot carry route segments.
    pub fn with_client(
        client: Client,
        base_url: &str,
        max_response_bytes: usize,
    ) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url).map_err(|err| RemoteError::Invalid(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Invalid(format!("base url cannot carry a path: {base_url}")));
        }
        if max_response_bytes == 0 {
            return Err(RemoteError::Invalid("max_response_bytes must be non-zero".to_string()));
        }
        Ok(Self {
            client,
            base_url,
            max_response_bytes,
        })
    }

    /// Resolves a route from percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, NetworkError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| NetworkError::Invalid("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends a GET request and returns the bounded body.
    fn get_bytes(&self, url: Url) -> Result<Vec<u8>, NetworkError> {
        let response = self.client.get(url).send().map_err(classify_send_error)?;
        self.read_success(response)
    }

    /// Sends a GET request and decodes the JSON body.
    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, NetworkError> {
        let bytes = self.get_bytes(url)?;
        serde_json::from_slice(&bytes).map_err(|err| NetworkError::Invalid(err.to_string()))
    }

    /// Checks the status and reads at most `max_response_bytes` of the body.
    fn read_success(&self, response: Response) -> Result<Vec<u8>, NetworkError> {
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, error_snippet(response)));
        }
        let max_bytes = u64::try_from(self.max_response_bytes)
            .map_err(|_| NetworkError::Invalid("response limit overflow".to_string()))?;
        if let Some(length) = response.content_length()
            && length > max_bytes
        {
            return Err(NetworkError::Invalid(format!(
                "response of {length} bytes exceeds limit of {max_bytes}"
            )));
        }
        let limit = max_bytes
            .checked_add(1)
            .ok_or_else(|| NetworkError::Invalid("response limit overflow".to_string()))?;
        let mut bytes = Vec::new();
        response
            .take(limit)
            .read_to_end(&mut bytes)
            .map_err(|err| NetworkError::Transient(err.to_string()))?;
        if bytes.len() > self.max_response_bytes {
            return Err(NetworkError::Invalid(format!(
                "response exceeds limit of {max_bytes} bytes"
            )));
        }
        Ok(bytes)
    }
}

impl FormServer for HttpFormServer {
    fn fetch_form_header(
        &self,
        form_id: &FormId,
        device_id: &DeviceId,
    ) -> Result<FormHeader, NetworkError> {
        let mut url = self.endpoint(&["forms", form_id.as_str(), "header"])?;
        url.query_pairs_mut().append_pair("deviceId", device_id.as_str());
        self.get_json(url)
    }

    fn fetch_form_headers(&self, device_id: &DeviceId) -> Result<Vec<FormHeader>, NetworkError> {
        let mut url = self.endpoint(&["forms"])?;
        url.query_pairs_mut().append_pair("deviceId", device_id.as_str());
        self.get_json(url)
    }

    fn download_form_archive(&self, form_id: &FormId) -> Result<Vec<u8>, NetworkError> {
        let url = self.endpoint(&["forms", form_id.as_str(), "archive"])?;
        self.get_bytes(url)
    }

    fn download_resource_archive(&self, resource_id: &ResourceId) -> Result<Vec<u8>, NetworkError> {
        let url = self.endpoint(&["resources", resource_id.as_str(), "archive"])?;
        self.get_bytes(url)
    }

    fn notify_file_available(
        &self,
        action: NotifyAction,
        form_id: &FormId,
        filename: &str,
        device_id: &DeviceId,
    ) -> Result<(), NetworkError> {
        let url = self.endpoint(&["notifications"])?;
        let body = NotificationBody {
            action: action.as_str(),
            form_id,
            filename,
            device_id: device_id.as_str(),
        };
        let response = self.client.post(url).json(&body).send().map_err(classify_send_error)?;
        self.read_success(response)?;
        Ok(())
    }

    fn fetch_pending_files(
        &self,
        form_ids: &[FormId],
        device_id: &DeviceId,
    ) -> Result<PendingFiles, NetworkError> {
        let mut url = self.endpoint(&["devicenotification"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("deviceId", device_id.as_str());
            for form_id in form_ids {
                query.append_pair("formId", form_id.as_str());
            }
        }
        let body: PendingFilesBody = self.get_json(url)?;
        Ok(PendingFiles {
            missing_files: body.missing_files,
            deleted_forms: body.deleted_forms,
        })
    }
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Maps a non-success status onto a [`NetworkError`].
fn classify_status(status: StatusCode, message: String) -> NetworkError {
    match status.as_u16() {
        403 => NetworkError::AssignmentRequired(message),
        404 | 410 => NetworkError::NotFound(message),
        408 | 429 | 500 ..= 599 => {
            NetworkError::Transient(format!("http status {status}: {message}"))
        }
        code => NetworkError::Rejected {
            status: code,
            message,
        },
    }
}

/// Maps a request failure onto a [`NetworkError`].
#[allow(clippy::needless_pass_by_value, reason = "Used directly as a map_err adapter.")]
fn classify_send_error(err: reqwest::Error) -> NetworkError {
    if err.is_builder() {
        NetworkError::Invalid(err.to_string())
    } else {
        NetworkError::Transient(err.to_string())
    }
}

/// Reads a short, lossy prefix of an error response body.
fn error_snippet(response: Response) -> String {
    let mut bytes = Vec::new();
    if response.take(MAX_ERROR_SNIPPET_BYTES).read_to_end(&mut bytes).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&bytes).trim().to_string()
}

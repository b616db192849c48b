// crates/survey-sync-remote/src/lib.rs
// ============================================================================
// Module: Survey Sync Remote Library
// Description: Network backends for form distribution and artifact upload.
// Purpose: Implement the core form server and artifact store interfaces.
// Dependencies: reqwest, aws-sdk-s3, tokio, survey-sync-core
// ============================================================================

//! ## Overview
//! [`HttpFormServer`] speaks the form server REST API over blocking HTTP and
//! [`S3ArtifactStore`] writes artifacts to S3-compatible object storage. Both
//! classify failures into [`survey_sync_core::NetworkError`] so the
//! transmission pipeline can tell retryable failures from terminal ones.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod http;
pub mod s3;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use http::HttpFormServer;
pub use s3::S3ArtifactStore;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while constructing remote backends.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Configuration is invalid for the backend.
    #[error("remote config invalid: {0}")]
    Invalid(String),
    /// Backend client initialization failed.
    #[error("remote client init failed: {0}")]
    Init(String),
}

// crates/survey-sync-core/src/lib.rs
// ============================================================================
// Module: Survey Sync Core Library
// Description: Public API surface for the survey sync core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Survey sync core models versioned questionnaires, captures answers offline
//! with conditional visibility, and moves submitted surveys to the server
//! through a persisted transmission state machine. Storage, network, and
//! local files are reached only through the traits in [`interfaces`], so the
//! engine runs unchanged against `SQLite`, HTTP, and object storage backends
//! or against in-memory doubles.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::core::*;

pub use interfaces::ArtifactStore;
pub use interfaces::FileStore;
pub use interfaces::FileStoreError;
pub use interfaces::FormServer;
pub use interfaces::GatewayError;
pub use interfaces::NetworkError;
pub use interfaces::PendingFiles;
pub use interfaces::PersistenceGateway;
pub use interfaces::StorageProbe;
pub use interfaces::UploadAck;
pub use runtime::DependencyEvaluator;
pub use runtime::DirectoryFiles;
pub use runtime::FormSyncError;
pub use runtime::FormSyncManager;
pub use runtime::FormSyncOutcome;
pub use runtime::FormSyncReport;
pub use runtime::InMemoryGateway;
pub use runtime::PipelineConfig;
pub use runtime::PipelineServices;
pub use runtime::ResponseStore;
pub use runtime::RetryPolicy;
pub use runtime::SubmissionService;
pub use runtime::SyncAuditSink;
pub use runtime::SyncError;
pub use runtime::SyncSummary;
pub use runtime::TransmissionPipeline;
pub use runtime::ValidationError;

// crates/survey-sync-core/src/runtime/mod.rs
// ============================================================================
// Module: Survey Sync Runtime
// Description: Response store, form sync, submission, and transmission engine.
// Purpose: Execute the survey state machine against the persistence and network seams.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement dependency evaluation, the in-memory response
//! store, form version sync, submission export, and the transmission
//! pipeline. Every entry point reads and writes through
//! [`crate::interfaces::PersistenceGateway`], which is the single source of
//! truth for survey state.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod archive;
pub mod audit;
pub mod evaluator;
pub mod files;
pub mod forms;
pub mod memory;
pub mod responses;
pub mod single_flight;
pub mod submission;
pub mod transmission;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use archive::ArchiveError;
pub use audit::FileAuditSink;
pub use audit::MemoryAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use audit::SyncAuditEvent;
pub use audit::SyncAuditEventParams;
pub use audit::SyncAuditSink;
pub use audit::SyncOutcome;
pub use evaluator::DependencyEvaluator;
pub use evaluator::ResponseLookup;
pub use files::DirectoryFiles;
pub use files::FixedStorageProbe;
pub use files::FsStorageProbe;
pub use forms::FormSyncBatchError;
pub use forms::FormSyncError;
pub use forms::FormSyncManager;
pub use forms::FormSyncOutcome;
pub use forms::FormSyncReport;
pub use memory::InMemoryGateway;
pub use responses::ResponseStore;
pub use responses::ValidationError;
pub use single_flight::SingleFlight;
pub use submission::ExportReport;
pub use submission::SubmissionError;
pub use submission::SubmissionPackage;
pub use submission::SubmissionService;
pub use transmission::DEFAULT_MIN_FREE_BYTES;
pub use transmission::PipelineConfig;
pub use transmission::PipelineServices;
pub use transmission::RetryPolicy;
pub use transmission::SyncError;
pub use transmission::SyncSummary;
pub use transmission::TransmissionPipeline;

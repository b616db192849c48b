// crates/survey-sync-store-sqlite/src/lib.rs
// ============================================================================
// Module: Survey Sync SQLite Store
// Description: Durable PersistenceGateway backend using SQLite.
// Purpose: Provide the device-local source of truth for survey sync state.
// Dependencies: survey-sync-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`PersistenceGateway`] holding survey
//! groups, installed forms, survey instances, responses, and transmissions.
//! Every gateway call runs in one short transaction so multi-row commits
//! (submission, export, missing-file requeue) are atomic. Form definitions are
//! stored with a content hash and fail closed when the stored bytes no longer
//! match it.
//!
//! [`PersistenceGateway`]: survey_sync_core::PersistenceGateway

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::MAX_DEFINITION_BYTES;
pub use store::SqliteGateway;
pub use store::SqliteGatewayConfig;
pub use store::SqliteGatewayError;
pub use store::SqliteJournalMode;
pub use store::SqliteSyncMode;

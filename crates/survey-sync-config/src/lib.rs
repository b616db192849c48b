// crates/survey-sync-config/src/lib.rs
// ============================================================================
// Module: Survey Sync Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for survey-sync.toml semantics.
// Dependencies: survey-sync-core, survey-sync-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `survey-sync-config` defines the configuration model for the survey sync
//! device agent: device identity, the form server, local storage, artifact
//! upload, pass tuning, and audit output. Validation is strict and fails
//! closed; config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;

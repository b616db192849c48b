// crates/survey-sync-core/src/core/time.rs
// ============================================================================
// Module: Survey Sync Time Model
// Description: Timestamp representation for persisted records.
// Purpose: Provide a single wall-clock representation shared by all crates.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Records carry unix-epoch milliseconds. Runtime components read the clock
//! only through [`Timestamp::now`], which keeps tests free to construct fixed
//! values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Time Values
// ============================================================================

/// Unix epoch milliseconds.
///
/// # Invariants
/// - A clock set before the epoch yields `0` rather than failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(value: i64) -> Self {
        Self(value)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self(i64::try_from(millis).unwrap_or(i64::MAX))
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }
}

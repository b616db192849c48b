// crates/survey-sync-core/src/core/version.rs
// ============================================================================
// Module: Survey Sync Form Versions
// Description: Decimal form versions with numeric ordering.
// Purpose: Drive update detection without string-ordering pitfalls.
// Dependencies: bigdecimal, serde
// ============================================================================

//! ## Overview
//! Form versions are decimals published by the server ("3", "3.0", "10.25").
//! Comparison is numeric: `3.0 == 3.00` and `10.0 > 9.5`. The original text is
//! retained so persisted rows and wire payloads round-trip unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when parsing a form version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// The version text is not a finite decimal.
    #[error("invalid form version: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Form Version
// ============================================================================

/// Monotonically increasing decimal form version.
///
/// # Invariants
/// - Equality and ordering are numeric, never textual.
/// - Negative versions are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "VersionRepr", into = "String")]
pub struct FormVersion {
    /// Parsed decimal used for comparison.
    value: BigDecimal,
    /// Original text used for persistence and display.
    text: String,
}

impl FormVersion {
    /// Parses a version from its decimal text.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::Invalid`] when the text is not a non-negative decimal.
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let trimmed = text.trim();
        let value = BigDecimal::from_str(trimmed)
            .map_err(|_| VersionError::Invalid(trimmed.to_string()))?;
        if value < BigDecimal::from(0) {
            return Err(VersionError::Invalid(trimmed.to_string()));
        }
        Ok(Self {
            value,
            text: trimmed.to_string(),
        })
    }

    /// Returns the original version text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns true when `self` is strictly newer than `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.value > other.value
    }
}

impl PartialEq for FormVersion {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for FormVersion {}

impl PartialOrd for FormVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FormVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for FormVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.text.fmt(f)
    }
}

impl FromStr for FormVersion {
    type Err = VersionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl From<FormVersion> for String {
    fn from(version: FormVersion) -> Self {
        version.text
    }
}

/// Wire representation accepting either JSON strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    /// Version encoded as text.
    Text(String),
    /// Version encoded as a JSON number.
    Number(serde_json::Number),
}

impl TryFrom<VersionRepr> for FormVersion {
    type Error = VersionError;

    fn try_from(repr: VersionRepr) -> Result<Self, Self::Error> {
        match repr {
            VersionRepr::Text(text) => Self::parse(&text),
            VersionRepr::Number(number) => Self::parse(&number.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Update Detection
// ============================================================================

/// Returns true when the server version must replace the local install.
///
/// A missing local version always needs installing; otherwise only a strictly
/// greater server version qualifies, so equal or older versions never
/// downgrade the device.
#[must_use]
pub fn update_needed(local: Option<&FormVersion>, server: &FormVersion) -> bool {
    local.is_none_or(|local| server.is_newer_than(local))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    fn version(text: &str) -> FormVersion {
        FormVersion::parse(text).unwrap()
    }

    #[test]
    fn comparison_is_numeric_not_textual() {
        assert!(version("10.0").is_newer_than(&version("9.5")));
        assert_eq!(version("3.0"), version("3.00"));
        assert_eq!(version("3"), version("3.0"));
    }

    #[test]
    fn update_detection_only_moves_forward() {
        let local = version("3.0");
        let cases = [("2.9", false), ("3.0", false), ("3.1", true)];
        for (server, expected) in cases {
            assert_eq!(update_needed(Some(&local), &version(server)), expected, "server {server}");
        }
        assert!(update_needed(None, &version("1.0")));
    }

    #[test]
    fn rejects_non_decimal_and_negative_versions() {
        assert!(FormVersion::parse("abc").is_err());
        assert!(FormVersion::parse("-1.0").is_err());
    }

    #[test]
    fn deserializes_from_string_or_number() {
        let from_text: FormVersion = serde_json::from_str("\"2.5\"").unwrap();
        let from_number: FormVersion = serde_json::from_str("2.5").unwrap();
        assert_eq!(from_text, from_number);
        assert_eq!(serde_json::to_string(&from_text).unwrap(), "\"2.5\"");
    }
}

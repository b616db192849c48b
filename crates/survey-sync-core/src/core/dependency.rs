// crates/survey-sync-core/src/core/dependency.rs
// ============================================================================
// Module: Survey Sync Dependencies
// Description: Conditional-visibility rules between questions.
// Purpose: Define the dependency rule and its answer-matching semantics.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Dependency`] makes a question visible only when another question's
//! answer contains one of the accepted option texts.
//!
//! Invariants:
//! - A null pattern matches only a null value.
//! - Matching is case-sensitive and compares trimmed texts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::QuestionId;
use crate::core::response::VALUE_SEPARATOR;
use crate::core::response::decode_options;

// ============================================================================
// SECTION: Dependency
// ============================================================================

/// Visibility rule referencing another question's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Question whose answer controls visibility.
    #[serde(rename = "question")]
    pub question_id: QuestionId,
    /// `|`-delimited accepted option texts, or `None` for "unanswered".
    #[serde(default)]
    pub answer: Option<String>,
}

impl Dependency {
    /// Creates a dependency on `question_id` accepting the given pattern.
    #[must_use]
    pub fn new(question_id: QuestionId, answer: Option<&str>) -> Self {
        Self {
            question_id,
            answer: answer.map(str::to_string),
        }
    }

    /// Returns true when `value` satisfies the answer pattern.
    ///
    /// The value is decoded as an option response; the dependency matches
    /// when any decoded option text equals any pattern token after trimming.
    #[must_use]
    pub fn is_match(&self, value: Option<&str>) -> bool {
        match (self.answer.as_deref(), value) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some(pattern), Some(value)) => {
                let tokens: Vec<&str> = pattern.split(VALUE_SEPARATOR).map(str::trim).collect();
                decode_options(value)
                    .iter()
                    .any(|option| tokens.iter().any(|token| *token == option.text.trim()))
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

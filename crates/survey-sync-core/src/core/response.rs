// crates/survey-sync-core/src/core/response.rs
// ============================================================================
// Module: Survey Sync Responses
// Description: Question responses, composite response keys, and value codecs.
// Purpose: Define the immutable answer value object and its string encodings.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`QuestionResponse`] is the persisted answer to one question in one
//! iteration of a survey instance. Values are UTF-8 strings whose shape
//! depends on the [`ResponseType`]; multi-valued answers use `|` as the token
//! separator. Option answers are encoded as a JSON array of [`OptionValue`]s,
//! with a legacy fallback that splits plain text on `|`.
//!
//! Invariants:
//! - `responseKey` is the question id, suffixed with `|iteration` only when the
//!   iteration is greater than zero.
//! - [`Iteration::NONE`] never appears in an encoded key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::QuestionId;
use crate::core::identifiers::SurveyInstanceId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Token separator for multi-valued answers and composite keys.
pub const VALUE_SEPARATOR: char = '|';

// ============================================================================
// SECTION: Iterations
// ============================================================================

/// Iteration index of a repeatable group instantiation.
///
/// # Invariants
/// - [`Iteration::NONE`] (`-1`) marks questions outside repeatable groups.
/// - Repeated iterations are 0-based and never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Iteration(i64);

impl Iteration {
    /// Sentinel for questions that are not part of a repeatable group.
    pub const NONE: Self = Self(-1);

    /// Creates a repeated-group iteration.
    #[must_use]
    pub fn index(index: u32) -> Self {
        Self(i64::from(index))
    }

    /// Returns the raw iteration value (`-1` for [`Iteration::NONE`]).
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns the 0-based index for repeated iterations.
    #[must_use]
    pub fn as_index(self) -> Option<u32> {
        u32::try_from(self.0).ok()
    }

    /// Returns true for repeated-group iterations.
    #[must_use]
    pub const fn is_repeated(self) -> bool {
        self.0 >= 0
    }
}

impl TryFrom<i64> for Iteration {
    type Error = ResponseKeyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < -1 || value > i64::from(u32::MAX) {
            return Err(ResponseKeyError::InvalidIteration(value.to_string()));
        }
        Ok(Self(value))
    }
}

impl From<Iteration> for i64 {
    fn from(iteration: Iteration) -> Self {
        iteration.0
    }
}

impl fmt::Display for Iteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Response Keys
// ============================================================================

/// Errors raised when decoding composite response keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseKeyError {
    /// The key has no question id component.
    #[error("response key is missing a question id")]
    MissingQuestion,
    /// The iteration suffix is not a valid index.
    #[error("invalid iteration in response key: {0}")]
    InvalidIteration(String),
}

/// Composite `(question, iteration)` key for a response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    /// Template question identifier.
    pub question_id: QuestionId,
    /// Iteration the response belongs to.
    pub iteration: Iteration,
}

impl ResponseKey {
    /// Creates a new response key.
    #[must_use]
    pub const fn new(question_id: QuestionId, iteration: Iteration) -> Self {
        Self {
            question_id,
            iteration,
        }
    }

    /// Encodes the key as `questionId` or `questionId|iteration`.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_response_key(&self.question_id, self.iteration)
    }

    /// Decodes an encoded key.
    ///
    /// A bare question id decodes to [`Iteration::NONE`], since iteration zero
    /// and the non-repeated sentinel share the same encoding.
    ///
    /// # Errors
    ///
    /// Returns [`ResponseKeyError`] when the key is empty or the suffix is not
    /// a positive iteration.
    pub fn decode(encoded: &str) -> Result<Self, ResponseKeyError> {
        let (question, suffix) = match encoded.split_once(VALUE_SEPARATOR) {
            Some((question, suffix)) => (question, Some(suffix)),
            None => (encoded, None),
        };
        if question.is_empty() {
            return Err(ResponseKeyError::MissingQuestion);
        }
        let iteration = match suffix {
            None => Iteration::NONE,
            Some(raw) => {
                let index: u32 = raw
                    .parse()
                    .map_err(|_| ResponseKeyError::InvalidIteration(raw.to_string()))?;
                if index == 0 {
                    return Err(ResponseKeyError::InvalidIteration(raw.to_string()));
                }
                Iteration::index(index)
            }
        };
        Ok(Self::new(QuestionId::new(question), iteration))
    }
}

impl fmt::Display for ResponseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Encodes a response key without constructing a [`ResponseKey`].
#[must_use]
pub fn encode_response_key(question_id: &QuestionId, iteration: Iteration) -> String {
    if iteration.get() > 0 {
        format!("{}{VALUE_SEPARATOR}{}", question_id.as_str(), iteration.get())
    } else {
        question_id.as_str().to_string()
    }
}

// ============================================================================
// SECTION: Response Types
// ============================================================================

/// Type tag describing how a response value is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// Plain text, numbers, and barcodes.
    Value,
    /// JSON-encoded option list.
    Option,
    /// `lat|lon|elevation|code` geo point.
    Geo,
    /// Geo-shape feature collection.
    Shape,
    /// Photo file reference.
    Image,
    /// Video file reference.
    Video,
    /// Epoch-millisecond date.
    Date,
    /// Cascading selection path.
    Cascade,
    /// Signature image reference.
    Signature,
    /// Caddisfly test result payload.
    Caddisfly,
}

impl ResponseType {
    /// Returns the canonical label for the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Option => "option",
            Self::Geo => "geo",
            Self::Shape => "shape",
            Self::Image => "image",
            Self::Video => "video",
            Self::Date => "date",
            Self::Cascade => "cascade",
            Self::Signature => "signature",
            Self::Caddisfly => "caddisfly",
        }
    }

    /// Parses a canonical label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        let value = match label {
            "value" => Self::Value,
            "option" => Self::Option,
            "geo" => Self::Geo,
            "shape" => Self::Shape,
            "image" => Self::Image,
            "video" => Self::Video,
            "date" => Self::Date,
            "cascade" => Self::Cascade,
            "signature" => Self::Signature,
            "caddisfly" => Self::Caddisfly,
            _ => return None,
        };
        Some(value)
    }
}

// ============================================================================
// SECTION: Question Responses
// ============================================================================

/// Persisted answer to one question in one iteration.
///
/// # Invariants
/// - Immutable once constructed; updates replace the whole value.
/// - `row_id` is assigned by the persistence gateway and preserved across
///   upserts so updates happen in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionResponse {
    /// Gateway-assigned row identity, absent until first persisted.
    pub row_id: Option<u64>,
    /// Owning survey instance.
    pub survey_instance_id: SurveyInstanceId,
    /// Template question identifier.
    pub question_id: QuestionId,
    /// Iteration within a repeatable group, or [`Iteration::NONE`].
    pub iteration: Iteration,
    /// String-encoded answer value.
    pub value: String,
    /// Encoding of `value`.
    pub response_type: ResponseType,
    /// Media filename backing the answer, if any.
    pub filename: Option<String>,
    /// Whether the response is eligible for export.
    pub include: bool,
}

impl QuestionResponse {
    /// Creates a response with the include flag set and no media file.
    #[must_use]
    pub fn new(
        survey_instance_id: SurveyInstanceId,
        question_id: QuestionId,
        iteration: Iteration,
        value: impl Into<String>,
        response_type: ResponseType,
    ) -> Self {
        Self {
            row_id: None,
            survey_instance_id,
            question_id,
            iteration,
            value: value.into(),
            response_type,
            filename: None,
            include: true,
        }
    }

    /// Returns a copy referencing the given media file.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Returns a copy with the given include flag.
    #[must_use]
    pub const fn with_include(mut self, include: bool) -> Self {
        self.include = include;
        self
    }

    /// Returns the composite key for this response.
    #[must_use]
    pub fn key(&self) -> ResponseKey {
        ResponseKey::new(self.question_id.clone(), self.iteration)
    }

    /// Returns the encoded composite key for this response.
    #[must_use]
    pub fn response_key(&self) -> String {
        encode_response_key(&self.question_id, self.iteration)
    }

    /// Returns true when the value is non-blank and, for geo answers, the
    /// first two tokens parse as numbers.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.value.trim().is_empty() {
            return false;
        }
        if self.response_type == ResponseType::Geo {
            return is_valid_geo(&self.value);
        }
        true
    }
}

/// Checks that a geo value carries numeric latitude and longitude tokens.
fn is_valid_geo(value: &str) -> bool {
    let mut tokens = value.split(VALUE_SEPARATOR);
    let (Some(lat), Some(lon)) = (tokens.next(), tokens.next()) else {
        return false;
    };
    [lat, lon].iter().all(|token| {
        let token = token.trim();
        !token.is_empty() && token.parse::<f64>().is_ok_and(f64::is_finite)
    })
}

// ============================================================================
// SECTION: Option Values
// ============================================================================

/// Single selected option within an option response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionValue {
    /// Displayed option text.
    #[serde(default)]
    pub text: String,
    /// Optional option code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// True when this is the free-text "other" option.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_other: bool,
}

impl OptionValue {
    /// Creates a plain option value from its text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: None,
            is_other: false,
        }
    }
}

/// Serde helper that omits false flags.
#[allow(clippy::trivially_copy_pass_by_ref, reason = "Serde skip predicates take references.")]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Encodes selected options as a JSON array.
#[must_use]
pub fn encode_options(options: &[OptionValue]) -> String {
    serde_json::to_string(options).unwrap_or_default()
}

/// Decodes an option response value.
///
/// JSON arrays decode directly; anything else falls back to the legacy
/// `|`-delimited list of option texts.
#[must_use]
pub fn decode_options(value: &str) -> Vec<OptionValue> {
    if let Ok(options) = serde_json::from_str::<Vec<OptionValue>>(value) {
        return options;
    }
    value.split(VALUE_SEPARATOR).map(OptionValue::text).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

// crates/survey-sync-core/src/core/form.rs
// ============================================================================
// Module: Survey Sync Form Model
// Description: Immutable questionnaire definitions with repeatable groups.
// Purpose: Provide the template arena and per-iteration question views.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A [`Form`] is parsed once from a [`FormDefinition`] and never mutated.
//! Questions are stored as templates; repeatable groups expose each
//! iteration through a [`QuestionView`] overlay that carries only what varies
//! per iteration (the composite id and the resolved dependency target).
//! Options, levels, and validation rules are always read from the template.
//!
//! Invariants:
//! - Question ids are unique across the form and never contain `|`.
//! - Option texts never contain `|`, so dependency patterns stay unambiguous.
//! - Group ids are unique across the form.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::dependency::Dependency;
use crate::core::identifiers::FormId;
use crate::core::identifiers::GroupId;
use crate::core::identifiers::QuestionId;
use crate::core::identifiers::ResourceId;
use crate::core::identifiers::SurveyGroupId;
use crate::core::response::Iteration;
use crate::core::response::ResponseKey;
use crate::core::response::ResponseType;
use crate::core::response::VALUE_SEPARATOR;
use crate::core::response::encode_response_key;
use crate::core::version::FormVersion;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while parsing or validating form definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    /// The definition payload could not be decoded.
    #[error("form parse error: {0}")]
    Parse(String),
    /// The definition violates a structural invariant.
    #[error("invalid form: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Headers
// ============================================================================

/// Server-published summary of a form, used for update detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormHeader {
    /// Form identifier.
    pub id: FormId,
    /// Owning survey group.
    pub survey_group_id: SurveyGroupId,
    /// Survey group display name.
    #[serde(default)]
    pub survey_group_name: String,
    /// Form display name.
    #[serde(default)]
    pub name: String,
    /// Published version.
    pub version: FormVersion,
    /// Default language code.
    #[serde(default = "default_language")]
    pub language: String,
}

/// Returns the fallback language code for headers and definitions.
fn default_language() -> String {
    "en".to_string()
}

// ============================================================================
// SECTION: Question Model
// ============================================================================

/// Closed set of question types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// Free text or numeric entry.
    FreeText,
    /// Single or multiple choice.
    Option,
    /// Geo point capture.
    Geo,
    /// Geo shape drawing.
    GeoShape,
    /// Photo capture.
    Photo,
    /// Video capture.
    Video,
    /// Date entry.
    Date,
    /// Barcode scan.
    Barcode,
    /// Cascading selection over resource data.
    Cascade,
    /// Signature capture.
    Signature,
    /// Caddisfly water-quality test result.
    Caddisfly,
}

impl QuestionType {
    /// Returns the response encoding produced by this question type.
    #[must_use]
    pub const fn response_type(self) -> ResponseType {
        match self {
            Self::FreeText | Self::Barcode => ResponseType::Value,
            Self::Option => ResponseType::Option,
            Self::Geo => ResponseType::Geo,
            Self::GeoShape => ResponseType::Shape,
            Self::Photo => ResponseType::Image,
            Self::Video => ResponseType::Video,
            Self::Date => ResponseType::Date,
            Self::Cascade => ResponseType::Cascade,
            Self::Signature => ResponseType::Signature,
            Self::Caddisfly => ResponseType::Caddisfly,
        }
    }
}

/// Selectable option of a choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOption {
    /// Displayed option text.
    pub text: String,
    /// Optional option code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Level of a cascading-select question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Level display name.
    pub text: String,
}

/// Value constraints applied before a response is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationRule {
    /// Requires the value to parse as a number.
    pub numeric: bool,
    /// Allows negative numbers.
    pub allow_signed: bool,
    /// Allows fractional numbers.
    pub allow_decimal: bool,
    /// Inclusive lower bound for numeric values.
    pub min_value: Option<f64>,
    /// Inclusive upper bound for numeric values.
    pub max_value: Option<f64>,
    /// Maximum character length for text values.
    pub max_length: Option<usize>,
}

/// Reason a value was rejected by a [`ValidationRule`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    /// Value is not a number.
    #[error("value is not a number")]
    NotNumeric,
    /// Negative value where unsigned is required.
    #[error("value must not be negative")]
    Signed,
    /// Fractional value where an integer is required.
    #[error("value must be a whole number")]
    Decimal,
    /// Value below the minimum.
    #[error("value is below the minimum of {0}")]
    BelowMinimum(String),
    /// Value above the maximum.
    #[error("value is above the maximum of {0}")]
    AboveMaximum(String),
    /// Text longer than allowed.
    #[error("value exceeds {0} characters")]
    TooLong(usize),
}

impl ValidationRule {
    /// Checks a raw value against the rule.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuleViolation`] encountered.
    pub fn check(&self, value: &str) -> Result<(), RuleViolation> {
        if let Some(max_length) = self.max_length
            && value.chars().count() > max_length
        {
            return Err(RuleViolation::TooLong(max_length));
        }
        if !self.numeric {
            return Ok(());
        }
        let trimmed = value.trim();
        let number: f64 = trimmed.parse().map_err(|_| RuleViolation::NotNumeric)?;
        if !number.is_finite() {
            return Err(RuleViolation::NotNumeric);
        }
        if !self.allow_signed && number < 0.0 {
            return Err(RuleViolation::Signed);
        }
        if !self.allow_decimal && trimmed.contains(['.', 'e', 'E']) {
            return Err(RuleViolation::Decimal);
        }
        if let Some(min) = self.min_value
            && number < min
        {
            return Err(RuleViolation::BelowMinimum(min.to_string()));
        }
        if let Some(max) = self.max_value
            && number > max
        {
            return Err(RuleViolation::AboveMaximum(max.to_string()));
        }
        Ok(())
    }
}

/// Template question shared by every iteration of its group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Template question identifier.
    pub id: QuestionId,
    /// Display order within the group.
    #[serde(default)]
    pub order: u32,
    /// Question text.
    #[serde(default)]
    pub text: String,
    /// Question type.
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Whether a valid answer is required when active.
    #[serde(default)]
    pub mandatory: bool,
    /// Optional visibility rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<Dependency>,
    /// Ordered options for choice questions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<QuestionOption>,
    /// Ordered levels for cascading questions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<Level>,
    /// Whether the answer is locked once captured (geo locking).
    #[serde(default)]
    pub locked: bool,
    /// Whether several options may be selected.
    #[serde(default)]
    pub allow_multiple: bool,
    /// Whether a free-text "other" option is offered.
    #[serde(default)]
    pub allow_other: bool,
    /// Optional value constraints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,
}

/// Ordered group of questions, optionally repeatable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionGroup {
    /// Group identifier.
    pub id: GroupId,
    /// Display order within the form.
    #[serde(default)]
    pub order: u32,
    /// Group heading.
    #[serde(default)]
    pub heading: String,
    /// Whether the group may be instantiated several times.
    #[serde(default)]
    pub repeatable: bool,
    /// Template questions in display order.
    pub questions: Vec<Question>,
}

impl QuestionGroup {
    /// Returns true when `question_id` belongs to this group.
    #[must_use]
    pub fn contains(&self, question_id: &QuestionId) -> bool {
        self.questions.iter().any(|question| &question.id == question_id)
    }
}

// ============================================================================
// SECTION: Form Definition
// ============================================================================

/// Wire and storage representation of a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinition {
    /// Form identifier.
    pub id: FormId,
    /// Published version.
    pub version: FormVersion,
    /// Form display name.
    #[serde(default)]
    pub name: String,
    /// Default language code.
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Owning survey group, carried by definitions shipped without a header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey_group_id: Option<SurveyGroupId>,
    /// Survey group display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub survey_group_name: String,
    /// Resource archives referenced by the form.
    #[serde(default)]
    pub resources: Vec<ResourceId>,
    /// Question groups in display order.
    pub groups: Vec<QuestionGroup>,
}

impl FormDefinition {
    /// Decodes a definition from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormError::Parse`] when the payload is not a valid definition.
    pub fn from_json(bytes: &[u8]) -> Result<Self, FormError> {
        serde_json::from_slice(bytes).map_err(|err| FormError::Parse(err.to_string()))
    }
}

// ============================================================================
// SECTION: Form
// ============================================================================

/// Location of a template question inside the group list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QuestionSlot {
    /// Index into `groups`.
    group: usize,
    /// Index into the group's `questions`.
    question: usize,
}

/// Immutable questionnaire with an index over its template questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FormDefinition", into = "FormDefinition")]
pub struct Form {
    /// Validated definition.
    definition: FormDefinition,
    /// Template lookup by question id.
    index: BTreeMap<QuestionId, QuestionSlot>,
}

impl Form {
    /// Validates a definition and builds the template index.
    ///
    /// # Errors
    ///
    /// Returns [`FormError::Invalid`] when ids collide or reserved characters
    /// appear in ids or option texts.
    pub fn from_definition(definition: FormDefinition) -> Result<Self, FormError> {
        let mut index = BTreeMap::new();
        let mut group_ids = BTreeSet::new();
        for (group_pos, group) in definition.groups.iter().enumerate() {
            if !group_ids.insert(group.id.clone()) {
                return Err(FormError::Invalid(format!("duplicate group id: {}", group.id)));
            }
            for (question_pos, question) in group.questions.iter().enumerate() {
                validate_question(question)?;
                let slot = QuestionSlot {
                    group: group_pos,
                    question: question_pos,
                };
                if index.insert(question.id.clone(), slot).is_some() {
                    return Err(FormError::Invalid(format!(
                        "duplicate question id: {}",
                        question.id
                    )));
                }
            }
        }
        Ok(Self {
            definition,
            index,
        })
    }

    /// Decodes and validates a form from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FormError`] when decoding or validation fails.
    pub fn from_json(bytes: &[u8]) -> Result<Self, FormError> {
        Self::from_definition(FormDefinition::from_json(bytes)?)
    }

    /// Returns the underlying definition.
    #[must_use]
    pub const fn definition(&self) -> &FormDefinition {
        &self.definition
    }

    /// Returns the form identifier.
    #[must_use]
    pub const fn id(&self) -> &FormId {
        &self.definition.id
    }

    /// Returns the form version.
    #[must_use]
    pub const fn version(&self) -> &FormVersion {
        &self.definition.version
    }

    /// Returns the form name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Returns the default language code.
    #[must_use]
    pub fn default_language(&self) -> &str {
        &self.definition.default_language
    }

    /// Builds the header a definition implies when none was fetched.
    ///
    /// A definition without a survey group forms a group of its own.
    #[must_use]
    pub fn implied_header(&self) -> FormHeader {
        let definition = &self.definition;
        let survey_group_id = definition
            .survey_group_id
            .clone()
            .unwrap_or_else(|| SurveyGroupId::new(definition.id.as_str()));
        let survey_group_name = if definition.survey_group_name.is_empty() {
            definition.name.clone()
        } else {
            definition.survey_group_name.clone()
        };
        FormHeader {
            id: definition.id.clone(),
            survey_group_id,
            survey_group_name,
            name: definition.name.clone(),
            version: definition.version.clone(),
            language: definition.default_language.clone(),
        }
    }

    /// Returns the referenced resource archives.
    #[must_use]
    pub fn resources(&self) -> &[ResourceId] {
        &self.definition.resources
    }

    /// Returns the groups in display order.
    #[must_use]
    pub fn groups(&self) -> &[QuestionGroup] {
        &self.definition.groups
    }

    /// Returns a group by id.
    #[must_use]
    pub fn group(&self, group_id: &GroupId) -> Option<&QuestionGroup> {
        self.definition.groups.iter().find(|group| &group.id == group_id)
    }

    /// Returns a template question by id.
    #[must_use]
    pub fn question(&self, question_id: &QuestionId) -> Option<&Question> {
        let slot = self.index.get(question_id)?;
        self.definition.groups.get(slot.group)?.questions.get(slot.question)
    }

    /// Returns the group owning a template question.
    #[must_use]
    pub fn group_of(&self, question_id: &QuestionId) -> Option<&QuestionGroup> {
        let slot = self.index.get(question_id)?;
        self.definition.groups.get(slot.group)
    }

    /// Returns the view of a question in a given iteration.
    ///
    /// Non-repeatable groups only have [`Iteration::NONE`]; repeatable groups
    /// only have repeated iterations.
    #[must_use]
    pub fn view(&self, question_id: &QuestionId, iteration: Iteration) -> Option<QuestionView<'_>> {
        let group = self.group_of(question_id)?;
        if group.repeatable != iteration.is_repeated() {
            return None;
        }
        let template = self.question(question_id)?;
        Some(QuestionView::new(group, template, iteration))
    }

    /// Returns views of every question of a group in one iteration.
    pub fn views<'a>(
        &'a self,
        group: &'a QuestionGroup,
        iteration: Iteration,
    ) -> impl Iterator<Item = QuestionView<'a>> + 'a {
        group.questions.iter().map(move |template| QuestionView::new(group, template, iteration))
    }

    /// Returns the iteration used for a group's questions when only a single
    /// instantiation exists.
    #[must_use]
    pub fn default_iteration(group: &QuestionGroup) -> Iteration {
        if group.repeatable { Iteration::index(0) } else { Iteration::NONE }
    }
}

impl TryFrom<FormDefinition> for Form {
    type Error = FormError;

    fn try_from(definition: FormDefinition) -> Result<Self, Self::Error> {
        Self::from_definition(definition)
    }
}

impl From<Form> for FormDefinition {
    fn from(form: Form) -> Self {
        form.definition
    }
}

/// Validates reserved characters in a template question.
fn validate_question(question: &Question) -> Result<(), FormError> {
    if question.id.as_str().is_empty() || question.id.as_str().contains(VALUE_SEPARATOR) {
        return Err(FormError::Invalid(format!("invalid question id: {}", question.id)));
    }
    if let Some(option) =
        question.options.iter().find(|option| option.text.contains(VALUE_SEPARATOR))
    {
        return Err(FormError::Invalid(format!(
            "option text contains reserved separator in question {}: {}",
            question.id, option.text
        )));
    }
    Ok(())
}

// ============================================================================
// SECTION: Question Views
// ============================================================================

/// Per-iteration overlay over a template question.
///
/// # Invariants
/// - Only the id and the dependency target vary by iteration; every other
///   attribute is borrowed from the shared template.
#[derive(Debug, Clone, Copy)]
pub struct QuestionView<'a> {
    /// Group owning the template.
    group: &'a QuestionGroup,
    /// Shared template question.
    template: &'a Question,
    /// Iteration this view materializes.
    iteration: Iteration,
}

impl<'a> QuestionView<'a> {
    /// Creates a view for a template in one iteration.
    const fn new(group: &'a QuestionGroup, template: &'a Question, iteration: Iteration) -> Self {
        Self {
            group,
            template,
            iteration,
        }
    }

    /// Returns the shared template.
    #[must_use]
    pub const fn template(&self) -> &'a Question {
        self.template
    }

    /// Returns the owning group.
    #[must_use]
    pub const fn group(&self) -> &'a QuestionGroup {
        self.group
    }

    /// Returns the materialized iteration.
    #[must_use]
    pub const fn iteration(&self) -> Iteration {
        self.iteration
    }

    /// Returns the composite id used for rendering and response lookup.
    #[must_use]
    pub fn id(&self) -> String {
        encode_response_key(&self.template.id, self.iteration)
    }

    /// Returns the response key for this view.
    #[must_use]
    pub fn key(&self) -> ResponseKey {
        ResponseKey::new(self.template.id.clone(), self.iteration)
    }

    /// Returns the dependency rule together with the response key it reads.
    ///
    /// Inside a repeatable group, a dependency on a sibling question reads the
    /// same iteration; any other dependency reads the non-repeated key.
    #[must_use]
    pub fn dependency(&self) -> Option<(&'a Dependency, ResponseKey)> {
        let dependency = self.template.dependency.as_ref()?;
        let iteration = if self.group.repeatable && self.group.contains(&dependency.question_id) {
            self.iteration
        } else {
            Iteration::NONE
        };
        Some((dependency, ResponseKey::new(dependency.question_id.clone(), iteration)))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use serde_json::json;

    use super::*;

    fn sample_form() -> Form {
        let payload = json!({
            "id": "form-1",
            "version": "2.0",
            "name": "Household",
            "groups": [
                {
                    "id": "g1",
                    "questions": [
                        {"id": "q1", "type": "option", "options": [{"text": "Yes"}, {"text": "No"}]}
                    ]
                },
                {
                    "id": "g2",
                    "repeatable": true,
                    "questions": [
                        {"id": "q2", "type": "option", "options": [{"text": "A"}]},
                        {"id": "q3", "type": "free_text", "mandatory": true,
                         "dependency": {"question": "q2", "answer": "A"}},
                        {"id": "q4", "type": "free_text",
                         "dependency": {"question": "q1", "answer": "Yes"}}
                    ]
                }
            ]
        });
        Form::from_json(payload.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn views_share_template_and_rewrite_id() {
        let form = sample_form();
        let view = form.view(&QuestionId::new("q3"), Iteration::index(2)).unwrap();
        assert_eq!(view.id(), "q3|2");
        assert!(std::ptr::eq(view.template(), form.question(&QuestionId::new("q3")).unwrap()));
    }

    #[test]
    fn sibling_dependencies_follow_the_iteration() {
        let form = sample_form();
        let sibling = form.view(&QuestionId::new("q3"), Iteration::index(2)).unwrap();
        let (_, key) = sibling.dependency().unwrap();
        assert_eq!(key.encode(), "q2|2");

        let outer = form.view(&QuestionId::new("q4"), Iteration::index(2)).unwrap();
        let (_, key) = outer.dependency().unwrap();
        assert_eq!(key.encode(), "q1");
    }

    #[test]
    fn view_rejects_mismatched_iteration_kind() {
        let form = sample_form();
        assert!(form.view(&QuestionId::new("q1"), Iteration::index(0)).is_none());
        assert!(form.view(&QuestionId::new("q2"), Iteration::NONE).is_none());
    }

    #[test]
    fn rejects_reserved_separator_in_ids_and_options() {
        let bad_id = json!({"id": "f", "version": 1, "groups": [
            {"id": "g", "questions": [{"id": "q|1", "type": "free_text"}]}
        ]});
        assert!(matches!(
            Form::from_json(bad_id.to_string().as_bytes()),
            Err(FormError::Invalid(_))
        ));
        let bad_option = json!({"id": "f", "version": 1, "groups": [
            {"id": "g", "questions": [{"id": "q", "type": "option", "options": [{"text": "a|b"}]}]}
        ]});
        assert!(Form::from_json(bad_option.to_string().as_bytes()).is_err());
    }

    #[test]
    fn rejects_duplicate_question_ids() {
        let payload = json!({"id": "f", "version": 1, "groups": [
            {"id": "g1", "questions": [{"id": "q", "type": "free_text"}]},
            {"id": "g2", "questions": [{"id": "q", "type": "date"}]}
        ]});
        assert!(Form::from_json(payload.to_string().as_bytes()).is_err());
    }

    #[test]
    fn validation_rule_enforces_numeric_bounds() {
        let rule = ValidationRule {
            numeric: true,
            allow_signed: false,
            allow_decimal: false,
            min_value: Some(1.0),
            max_value: Some(10.0),
            max_length: None,
        };
        assert!(rule.check("5").is_ok());
        assert_eq!(rule.check("-5"), Err(RuleViolation::Signed));
        assert_eq!(rule.check("2.5"), Err(RuleViolation::Decimal));
        assert!(matches!(rule.check("11"), Err(RuleViolation::AboveMaximum(_))));
        assert_eq!(rule.check("abc"), Err(RuleViolation::NotNumeric));
    }

    #[test]
    fn implied_header_falls_back_to_a_group_of_its_own() {
        let header = sample_form().implied_header();
        assert_eq!(header.survey_group_id, SurveyGroupId::new("form-1"));
        assert_eq!(header.survey_group_name, "Household");
        assert_eq!(header.version.as_str(), "2.0");

        let payload = json!({
            "id": "form-2",
            "version": "1.0",
            "surveyGroupId": "sg-9",
            "surveyGroupName": "Water points",
            "groups": [{"id": "g1", "questions": [{"id": "q1", "type": "free_text"}]}]
        });
        let header = Form::from_json(payload.to_string().as_bytes()).unwrap().implied_header();
        assert_eq!(header.survey_group_id, SurveyGroupId::new("sg-9"));
        assert_eq!(header.survey_group_name, "Water points");
        assert_eq!(header.language, "en");
    }
}

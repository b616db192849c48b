// crates/survey-sync-core/src/runtime/responses.rs
// ============================================================================
// Module: Survey Sync Response Store
// Description: Keyed answer collection for one survey instance.
// Purpose: Track repeatable-group iterations and compute completion and validity.
// Dependencies: crate::core, crate::runtime::evaluator, thiserror
// ============================================================================

//! ## Overview
//! [`ResponseStore`] owns the answers of a single survey instance, keyed by
//! the encoded response key. It is mutated through `&mut self` only, so
//! writes to one instance are serialized by ownership. Completion and
//! submittability are recomputed from the current answers on every call.
//!
//! Invariants:
//! - Keys are unique; `put` upserts and preserves the persisted row identity.
//! - Inactive mandatory questions never block completion.
//! - Validation failures are reported as [`ValidationError`] and never reach
//!   the network layer.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::core::Form;
use crate::core::GroupId;
use crate::core::Iteration;
use crate::core::QuestionGroup;
use crate::core::QuestionId;
use crate::core::QuestionResponse;
use crate::core::ResponseKey;
use crate::core::RuleViolation;
use crate::core::SurveyInstanceId;
use crate::core::response::encode_response_key;
use crate::runtime::evaluator::DependencyEvaluator;
use crate::runtime::evaluator::ResponseLookup;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Response validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The question is not part of the form, or the iteration kind mismatches.
    #[error("unknown question for this form: {0}")]
    UnknownQuestion(String),
    /// The group is not part of the form.
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    /// Iterations were requested for a non-repeatable group.
    #[error("group is not repeatable: {0}")]
    NotRepeatable(String),
    /// The response belongs to another survey instance.
    #[error("response belongs to another survey instance: {0}")]
    InstanceMismatch(String),
    /// The value violates the question's validation rule.
    #[error("invalid value for {question}: {violation}")]
    Rule {
        /// Encoded response key.
        question: String,
        /// Rule violation.
        violation: RuleViolation,
    },
    /// An active mandatory question lacks a valid answer.
    #[error("mandatory question unanswered: {0}")]
    MissingAnswer(String),
    /// No answer has been captured yet.
    #[error("survey has no responses")]
    NoResponses,
}

// ============================================================================
// SECTION: Response Store
// ============================================================================

/// Answers of one survey instance, bound to the form they answer.
#[derive(Debug, Clone)]
pub struct ResponseStore {
    /// Form being answered.
    form: Arc<Form>,
    /// Owning survey instance.
    instance_id: SurveyInstanceId,
    /// Answers by encoded response key.
    responses: BTreeMap<String, QuestionResponse>,
    /// Materialized iterations per repeatable group.
    iterations: BTreeMap<GroupId, BTreeSet<u32>>,
}

impl ResponseStore {
    /// Creates an empty store for an instance.
    #[must_use]
    pub const fn new(form: Arc<Form>, instance_id: SurveyInstanceId) -> Self {
        Self {
            form,
            instance_id,
            responses: BTreeMap::new(),
            iterations: BTreeMap::new(),
        }
    }

    /// Rebuilds a store from persisted responses.
    ///
    /// Rule checks are not re-applied; persisted answers were accepted when
    /// they were captured.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when a row does not fit the form.
    pub fn from_responses(
        form: Arc<Form>,
        instance_id: SurveyInstanceId,
        responses: impl IntoIterator<Item = QuestionResponse>,
    ) -> Result<Self, ValidationError> {
        let mut store = Self::new(form, instance_id);
        for response in responses {
            store.insert(response)?;
        }
        Ok(store)
    }

    /// Returns the form being answered.
    #[must_use]
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Returns a shared handle to the form.
    #[must_use]
    pub fn form_handle(&self) -> Arc<Form> {
        Arc::clone(&self.form)
    }

    /// Returns the owning instance.
    #[must_use]
    pub const fn instance_id(&self) -> &SurveyInstanceId {
        &self.instance_id
    }

    /// Returns every stored answer in key order.
    pub fn responses(&self) -> impl Iterator<Item = &QuestionResponse> {
        self.responses.values()
    }

    /// Returns the number of stored answers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Returns true when no answer is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Upserts an answer by key.
    ///
    /// Value, filename, and type are overwritten; the persisted row identity
    /// of an existing answer is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the answer does not fit the form or
    /// violates the question's rule.
    pub fn put(&mut self, response: QuestionResponse) -> Result<(), ValidationError> {
        if !response.value.trim().is_empty() {
            self.check_value(&response.question_id, response.iteration, &response.value)?;
        }
        self.insert(response)
    }

    /// Returns the answer stored for a question in an iteration.
    #[must_use]
    pub fn get(&self, question_id: &QuestionId, iteration: Iteration) -> Option<&QuestionResponse> {
        self.responses.get(&encode_response_key(question_id, iteration))
    }

    /// Deletes a single answer, returning it.
    pub fn remove(
        &mut self,
        question_id: &QuestionId,
        iteration: Iteration,
    ) -> Option<QuestionResponse> {
        self.responses.remove(&encode_response_key(question_id, iteration))
    }

    /// Materializes the next iteration of a repeatable group.
    ///
    /// The new iteration is one past the highest existing one, or zero.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the group is unknown or not repeatable.
    pub fn add_iteration(&mut self, group_id: &GroupId) -> Result<Iteration, ValidationError> {
        self.repeatable_group(group_id)?;
        let set = self.iterations.entry(group_id.clone()).or_default();
        let next = set.last().map_or(0, |last| last.saturating_add(1));
        set.insert(next);
        Ok(Iteration::index(next))
    }

    /// Deletes every answer of one iteration. Remaining iterations keep their
    /// indices.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the group is unknown or not repeatable.
    pub fn remove_iteration(
        &mut self,
        group_id: &GroupId,
        iteration: Iteration,
    ) -> Result<Vec<QuestionResponse>, ValidationError> {
        let question_ids: Vec<QuestionId> = self
            .repeatable_group(group_id)?
            .questions
            .iter()
            .map(|question| question.id.clone())
            .collect();
        let removed = question_ids
            .iter()
            .filter_map(|question_id| self.remove(question_id, iteration))
            .collect();
        if let (Some(index), Some(set)) = (iteration.as_index(), self.iterations.get_mut(group_id))
        {
            set.remove(&index);
        }
        Ok(removed)
    }

    /// Returns the number of materialized iterations of a group.
    #[must_use]
    pub fn iteration_count(&self, group_id: &GroupId) -> usize {
        self.iterations.get(group_id).map_or(0, BTreeSet::len)
    }

    /// Returns the materialized iterations of a group, in order.
    ///
    /// Non-repeatable groups always report [`Iteration::NONE`].
    #[must_use]
    pub fn iterations(&self, group: &QuestionGroup) -> Vec<Iteration> {
        if !group.repeatable {
            return vec![Iteration::NONE];
        }
        self.iterations
            .get(&group.id)
            .map(|set| set.iter().copied().map(Iteration::index).collect())
            .unwrap_or_default()
    }

    /// Returns true when every active mandatory question of the group has a
    /// valid answer in the iteration.
    #[must_use]
    pub fn is_group_complete(&self, group: &QuestionGroup, iteration: Iteration) -> bool {
        self.group_blocker(group, iteration).is_none()
    }

    /// Returns true when every group is complete in every materialized
    /// iteration and at least one answer exists.
    #[must_use]
    pub fn is_form_submittable(&self) -> bool {
        self.submission_blocker().is_none()
    }

    /// Returns the first reason the form cannot be submitted, if any.
    #[must_use]
    pub fn submission_blocker(&self) -> Option<ValidationError> {
        if self.responses.is_empty() {
            return Some(ValidationError::NoResponses);
        }
        self.form.groups().iter().find_map(|group| {
            self.iterations(group)
                .into_iter()
                .find_map(|iteration| self.group_blocker(group, iteration))
        })
    }

    /// Applies the question's validation rule to a raw value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when the question is unknown or the value
    /// violates its rule.
    pub fn check_value(
        &self,
        question_id: &QuestionId,
        iteration: Iteration,
        value: &str,
    ) -> Result<(), ValidationError> {
        let view = self
            .form
            .view(question_id, iteration)
            .ok_or_else(|| ValidationError::UnknownQuestion(view_key(question_id, iteration)))?;
        match &view.template().validation {
            Some(rule) => rule.check(value).map_err(|violation| ValidationError::Rule {
                question: view.id(),
                violation,
            }),
            None => Ok(()),
        }
    }

    /// Returns true when a question is active in an iteration.
    #[must_use]
    pub fn is_active(&self, question_id: &QuestionId, iteration: Iteration) -> bool {
        DependencyEvaluator::new(&self.form).is_question_active(question_id, iteration, self)
    }

    /// Returns the answers eligible for export: include flag set and question
    /// currently active.
    #[must_use]
    pub fn exportable(&self) -> Vec<&QuestionResponse> {
        self.responses
            .values()
            .filter(|response| {
                response.include && self.is_active(&response.question_id, response.iteration)
            })
            .collect()
    }

    /// Returns the media filenames referenced by exportable answers.
    #[must_use]
    pub fn media_filenames(&self) -> Vec<String> {
        let unique: BTreeSet<String> = self
            .exportable()
            .into_iter()
            .filter_map(|response| response.filename.clone())
            .collect();
        unique.into_iter().collect()
    }

    /// Inserts an answer without rule checks.
    fn insert(&mut self, mut response: QuestionResponse) -> Result<(), ValidationError> {
        if response.survey_instance_id != self.instance_id {
            return Err(ValidationError::InstanceMismatch(
                response.survey_instance_id.to_string(),
            ));
        }
        let view = self.form.view(&response.question_id, response.iteration).ok_or_else(|| {
            ValidationError::UnknownQuestion(view_key(&response.question_id, response.iteration))
        })?;
        let group_id = view.group().id.clone();
        let key = view.id();
        if let Some(index) = response.iteration.as_index() {
            self.iterations.entry(group_id).or_default().insert(index);
        }
        if let Some(existing) = self.responses.get(&key)
            && response.row_id.is_none()
        {
            response.row_id = existing.row_id;
        }
        self.responses.insert(key, response);
        Ok(())
    }

    /// Returns a group if it exists and is repeatable.
    fn repeatable_group(&self, group_id: &GroupId) -> Result<&QuestionGroup, ValidationError> {
        let group = self
            .form
            .group(group_id)
            .ok_or_else(|| ValidationError::UnknownGroup(group_id.to_string()))?;
        if !group.repeatable {
            return Err(ValidationError::NotRepeatable(group_id.to_string()));
        }
        Ok(group)
    }

    /// Returns the first active mandatory question of a group iteration that
    /// lacks a valid answer.
    fn group_blocker(
        &self,
        group: &QuestionGroup,
        iteration: Iteration,
    ) -> Option<ValidationError> {
        self.form.views(group, iteration).find_map(|view| {
            if !view.template().mandatory || !DependencyEvaluator::is_active(&view, self) {
                return None;
            }
            let answered = self
                .responses
                .get(&view.id())
                .is_some_and(QuestionResponse::is_valid);
            (!answered).then(|| ValidationError::MissingAnswer(view.id()))
        })
    }
}

impl ResponseLookup for ResponseStore {
    fn value_for(&self, key: &ResponseKey) -> Option<&str> {
        self.responses.get(&key.encode()).map(|response| response.value.as_str())
    }
}

/// Formats a question/iteration pair for error messages.
fn view_key(question_id: &QuestionId, iteration: Iteration) -> String {
    format!("{question_id} (iteration {iteration})")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

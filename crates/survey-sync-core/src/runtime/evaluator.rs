// crates/survey-sync-core/src/runtime/evaluator.rs
// ============================================================================
// Module: Survey Sync Dependency Evaluator
// Description: Question and group visibility over the current response set.
// Purpose: Decide which questions are active without caching across mutations.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! A question is active when it has no dependency, or when the value stored
//! under its dependency's response key matches the dependency pattern.
//! Evaluation reads the response set through [`ResponseLookup`] on every call;
//! nothing is memoized, so callers always observe the latest answers.
//!
//! Invariants:
//! - A dependency on an unknown question never fails; its value is treated as
//!   absent and the null-match rule applies.
//! - A group is active when at least one of its questions is active.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::Form;
use crate::core::Iteration;
use crate::core::QuestionGroup;
use crate::core::QuestionId;
use crate::core::QuestionView;
use crate::core::ResponseKey;

// ============================================================================
// SECTION: Response Lookup
// ============================================================================

/// Read access to answer values by response key.
pub trait ResponseLookup {
    /// Returns the stored value for a key, if any.
    fn value_for(&self, key: &ResponseKey) -> Option<&str>;
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Visibility evaluator bound to one form.
#[derive(Debug, Clone, Copy)]
pub struct DependencyEvaluator<'a> {
    /// Form whose templates are evaluated.
    form: &'a Form,
}

impl<'a> DependencyEvaluator<'a> {
    /// Creates an evaluator for a form.
    #[must_use]
    pub const fn new(form: &'a Form) -> Self {
        Self {
            form,
        }
    }

    /// Returns true when a materialized question is active.
    #[must_use]
    pub fn is_active<L: ResponseLookup + ?Sized>(view: &QuestionView<'_>, responses: &L) -> bool {
        let Some((dependency, key)) = view.dependency() else {
            return true;
        };
        dependency.is_match(responses.value_for(&key))
    }

    /// Returns true when a question is active in an iteration.
    ///
    /// Unknown questions and mismatched iteration kinds are inactive.
    #[must_use]
    pub fn is_question_active<L: ResponseLookup + ?Sized>(
        &self,
        question_id: &QuestionId,
        iteration: Iteration,
        responses: &L,
    ) -> bool {
        self.form.view(question_id, iteration).is_some_and(|view| Self::is_active(&view, responses))
    }

    /// Returns true when at least one question of the group is active.
    #[must_use]
    pub fn is_group_active<L: ResponseLookup + ?Sized>(
        &self,
        group: &QuestionGroup,
        iteration: Iteration,
        responses: &L,
    ) -> bool {
        self.form.views(group, iteration).any(|view| Self::is_active(&view, responses))
    }

    /// Returns the active views of a group in one iteration, in display order.
    #[must_use]
    pub fn active_views<L: ResponseLookup + ?Sized>(
        &self,
        group: &'a QuestionGroup,
        iteration: Iteration,
        responses: &L,
    ) -> Vec<QuestionView<'a>> {
        self.form.views(group, iteration).filter(|view| Self::is_active(view, responses)).collect()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    /// Minimal lookup keyed by encoded response key.
    struct MapLookup(BTreeMap<String, String>);

    impl ResponseLookup for MapLookup {
        fn value_for(&self, key: &ResponseKey) -> Option<&str> {
            self.0.get(&key.encode()).map(String::as_str)
        }
    }

    fn lookup(entries: &[(&str, &str)]) -> MapLookup {
        MapLookup(entries.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
    }

    fn form() -> Form {
        let payload = json!({
            "id": "f", "version": "1", "groups": [
                {"id": "g1", "questions": [
                    {"id": "q1", "type": "option", "options": [{"text": "Yes"}, {"text": "No"}]},
                    {"id": "q2", "type": "free_text",
                     "dependency": {"question": "q1", "answer": "Yes"}},
                    {"id": "q3", "type": "free_text",
                     "dependency": {"question": "ghost", "answer": "Yes"}},
                    {"id": "q4", "type": "free_text", "dependency": {"question": "ghost"}}
                ]},
                {"id": "g2", "repeatable": true, "questions": [
                    {"id": "r1", "type": "option", "options": [{"text": "A"}, {"text": "B"}]},
                    {"id": "r2", "type": "free_text",
                     "dependency": {"question": "r1", "answer": "A"}}
                ]}
            ]
        });
        Form::from_json(payload.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn dependent_question_follows_parent_answer() {
        let form = form();
        let evaluator = DependencyEvaluator::new(&form);
        let q2 = QuestionId::new("q2");
        assert!(!evaluator.is_question_active(&q2, Iteration::NONE, &lookup(&[])));
        assert!(evaluator.is_question_active(&q2, Iteration::NONE, &lookup(&[("q1", "Yes")])));
        assert!(!evaluator.is_question_active(&q2, Iteration::NONE, &lookup(&[("q1", "No")])));
        let json_value = r#"[{"text":" Yes "}]"#;
        assert!(evaluator.is_question_active(&q2, Iteration::NONE, &lookup(&[("q1", json_value)])));
    }

    #[test]
    fn missing_dependency_target_is_treated_as_null() {
        let form = form();
        let evaluator = DependencyEvaluator::new(&form);
        let empty = lookup(&[]);
        assert!(!evaluator.is_question_active(&QuestionId::new("q3"), Iteration::NONE, &empty));
        assert!(evaluator.is_question_active(&QuestionId::new("q4"), Iteration::NONE, &empty));
    }

    #[test]
    fn repeated_dependencies_read_their_own_iteration() {
        let form = form();
        let evaluator = DependencyEvaluator::new(&form);
        let responses = lookup(&[("r1", "A"), ("r1|1", "B")]);
        let r2 = QuestionId::new("r2");
        assert!(evaluator.is_question_active(&r2, Iteration::index(0), &responses));
        assert!(!evaluator.is_question_active(&r2, Iteration::index(1), &responses));
    }

    #[test]
    fn group_is_active_when_any_question_is() {
        let form = form();
        let evaluator = DependencyEvaluator::new(&form);
        let group = form.group(&crate::core::GroupId::new("g1")).unwrap();
        assert!(evaluator.is_group_active(group, Iteration::NONE, &lookup(&[])));
        let active = evaluator.active_views(group, Iteration::NONE, &lookup(&[("q1", "Yes")]));
        let ids: Vec<String> = active.iter().map(QuestionView::id).collect();
        assert_eq!(ids, vec!["q1", "q2", "q4"]);
    }
}

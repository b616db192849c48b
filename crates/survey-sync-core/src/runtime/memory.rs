// crates/survey-sync-core/src/runtime/memory.rs
// ============================================================================
// Module: Survey Sync In-Memory Gateway
// Description: Simple in-memory persistence gateway for tests and demos.
// Purpose: Provide a deterministic gateway implementation without external deps.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryGateway`] implements [`PersistenceGateway`] over ordered maps
//! behind one mutex, so every method is trivially atomic. It mirrors the
//! SQLite gateway's semantics and is not intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::core::FormId;
use crate::core::HashDigest;
use crate::core::InstalledForm;
use crate::core::QuestionId;
use crate::core::QuestionResponse;
use crate::core::ResponseKey;
use crate::core::SubmissionStatus;
use crate::core::SurveyGroup;
use crate::core::SurveyGroupId;
use crate::core::SurveyInstance;
use crate::core::SurveyInstanceId;
use crate::core::Timestamp;
use crate::core::TransmissionId;
use crate::core::TransmissionRecord;
use crate::core::TransmissionStatus;
use crate::interfaces::GatewayError;
use crate::interfaces::PersistenceGateway;

// ============================================================================
// SECTION: State
// ============================================================================

/// Response row key: instance, question, raw iteration.
type ResponseRowKey = (SurveyInstanceId, QuestionId, i64);

/// Mutable gateway contents.
#[derive(Debug, Default)]
struct MemoryState {
    /// Survey groups by id.
    groups: BTreeMap<SurveyGroupId, SurveyGroup>,
    /// Installed forms by id.
    forms: BTreeMap<FormId, InstalledForm>,
    /// Survey instances by id.
    instances: BTreeMap<SurveyInstanceId, SurveyInstance>,
    /// Responses by row key.
    responses: BTreeMap<ResponseRowKey, QuestionResponse>,
    /// Transmissions by raw id (enqueue order).
    transmissions: BTreeMap<u64, TransmissionRecord>,
    /// Last allocated response row id.
    last_response_row: u64,
    /// Last allocated transmission id.
    last_transmission: u64,
}

impl MemoryState {
    /// Applies a status transition to an instance.
    fn transition(
        &mut self,
        id: &SurveyInstanceId,
        status: SubmissionStatus,
    ) -> Result<&mut SurveyInstance, GatewayError> {
        let instance = self
            .instances
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("survey instance {id}")))?;
        if !instance.status.can_transition_to(status) {
            return Err(GatewayError::InvalidTransition {
                instance: id.to_string(),
                from: instance.status.as_str(),
                to: status.as_str(),
            });
        }
        instance.status = status;
        instance.updated_at = Timestamp::now();
        Ok(instance)
    }

    /// Fails unless the instance exists and its responses are still editable.
    fn ensure_editable(&self, id: &SurveyInstanceId) -> Result<(), GatewayError> {
        let instance = self
            .instances
            .get(id)
            .ok_or_else(|| GatewayError::NotFound(format!("survey instance {id}")))?;
        if instance.status.is_editable() {
            Ok(())
        } else {
            Err(GatewayError::Frozen {
                instance: id.to_string(),
                status: instance.status.as_str(),
            })
        }
    }

    /// Stores a response, assigning a row id when new.
    fn upsert_response(&mut self, response: &QuestionResponse) -> QuestionResponse {
        let key = (
            response.survey_instance_id.clone(),
            response.question_id.clone(),
            response.iteration.get(),
        );
        let row_id = match self.responses.get(&key).and_then(|existing| existing.row_id) {
            Some(row_id) => row_id,
            None => {
                self.last_response_row += 1;
                self.last_response_row
            }
        };
        let mut stored = response.clone();
        stored.row_id = Some(row_id);
        self.responses.insert(key, stored.clone());
        stored
    }

    /// Enqueues a transmission unless the pair already exists.
    fn enqueue(
        &mut self,
        instance: &SurveyInstanceId,
        filename: &str,
    ) -> Result<TransmissionRecord, GatewayError> {
        if let Some(existing) = self.transmissions.values().find(|record| {
            &record.survey_instance_id == instance && record.filename == filename
        }) {
            return Ok(existing.clone());
        }
        let form_id = self
            .instances
            .get(instance)
            .map(|row| row.form_id.clone())
            .ok_or_else(|| GatewayError::NotFound(format!("survey instance {instance}")))?;
        self.last_transmission += 1;
        let id = TransmissionId::from_raw(self.last_transmission)
            .ok_or_else(|| GatewayError::Corrupt("transmission id overflow".to_string()))?;
        let now = Timestamp::now();
        let record = TransmissionRecord {
            id,
            survey_instance_id: instance.clone(),
            form_id,
            filename: filename.to_string(),
            status: TransmissionStatus::Queued,
            checksum: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.transmissions.insert(id.get(), record.clone());
        Ok(record)
    }
}

// ============================================================================
// SECTION: In-Memory Gateway
// ============================================================================

/// In-memory persistence gateway for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryGateway {
    /// Gateway state protected by a mutex.
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryGateway {
    /// Creates a new, empty in-memory gateway.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Locks the gateway state.
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, GatewayError> {
        self.state.lock().map_err(|_| GatewayError::Store("gateway mutex poisoned".to_string()))
    }
}

impl PersistenceGateway for InMemoryGateway {
    fn upsert_survey_group(&self, id: &SurveyGroupId, name: &str) -> Result<(), GatewayError> {
        let mut state = self.lock()?;
        let group = state.groups.entry(id.clone()).or_insert_with(|| SurveyGroup {
            id: id.clone(),
            name: String::new(),
            viewed: false,
        });
        group.name = name.to_string();
        drop(state);
        Ok(())
    }

    fn survey_group(&self, id: &SurveyGroupId) -> Result<Option<SurveyGroup>, GatewayError> {
        Ok(self.lock()?.groups.get(id).cloned())
    }

    fn set_survey_group_viewed(
        &self,
        id: &SurveyGroupId,
        viewed: bool,
    ) -> Result<(), GatewayError> {
        let mut state = self.lock()?;
        let group = state
            .groups
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(format!("survey group {id}")))?;
        group.viewed = viewed;
        drop(state);
        Ok(())
    }

    fn install_form(&self, form: &InstalledForm) -> Result<(), GatewayError> {
        self.lock()?.forms.insert(form.id().clone(), form.clone());
        Ok(())
    }

    fn form(&self, id: &FormId) -> Result<Option<InstalledForm>, GatewayError> {
        Ok(self.lock()?.forms.get(id).cloned())
    }

    fn form_ids(&self) -> Result<Vec<FormId>, GatewayError> {
        Ok(self.lock()?.forms.keys().cloned().collect())
    }

    fn mark_form_deleted(&self, id: &FormId) -> Result<bool, GatewayError> {
        let mut state = self.lock()?;
        let Some(form) = state.forms.get_mut(id) else {
            return Ok(false);
        };
        form.deleted = true;
        drop(state);
        Ok(true)
    }

    fn delete_form(&self, id: &FormId) -> Result<(), GatewayError> {
        self.lock()?.forms.remove(id);
        Ok(())
    }

    fn create_instance(&self, instance: &SurveyInstance) -> Result<(), GatewayError> {
        let mut state = self.lock()?;
        if state.instances.contains_key(&instance.id) {
            return Err(GatewayError::Invalid(format!(
                "survey instance already exists: {}",
                instance.id
            )));
        }
        state.instances.insert(instance.id.clone(), instance.clone());
        drop(state);
        Ok(())
    }

    fn instance(&self, id: &SurveyInstanceId) -> Result<Option<SurveyInstance>, GatewayError> {
        Ok(self.lock()?.instances.get(id).cloned())
    }

    fn instances_with_status(
        &self,
        status: SubmissionStatus,
    ) -> Result<Vec<SurveyInstance>, GatewayError> {
        let mut rows: Vec<SurveyInstance> = self
            .lock()?
            .instances
            .values()
            .filter(|instance| instance.status == status)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    fn set_instance_status(
        &self,
        id: &SurveyInstanceId,
        status: SubmissionStatus,
    ) -> Result<SurveyInstance, GatewayError> {
        let mut state = self.lock()?;
        let updated = state.transition(id, status)?.clone();
        drop(state);
        Ok(updated)
    }

    fn save_response(&self, response: &QuestionResponse) -> Result<QuestionResponse, GatewayError> {
        let mut state = self.lock()?;
        state.ensure_editable(&response.survey_instance_id)?;
        let stored = state.upsert_response(response);
        drop(state);
        Ok(stored)
    }

    fn delete_response(
        &self,
        instance: &SurveyInstanceId,
        key: &ResponseKey,
    ) -> Result<bool, GatewayError> {
        let mut state = self.lock()?;
        state.ensure_editable(instance)?;
        let row_key = (instance.clone(), key.question_id.clone(), key.iteration.get());
        let removed = state.responses.remove(&row_key).is_some();
        drop(state);
        Ok(removed)
    }

    fn responses(
        &self,
        instance: &SurveyInstanceId,
    ) -> Result<Vec<QuestionResponse>, GatewayError> {
        Ok(self
            .lock()?
            .responses
            .iter()
            .filter(|((owner, _, _), _)| owner == instance)
            .map(|(_, response)| response.clone())
            .collect())
    }

    fn commit_submission(
        &self,
        instance: &SurveyInstanceId,
        responses: &[QuestionResponse],
    ) -> Result<SurveyInstance, GatewayError> {
        let mut state = self.lock()?;
        if let Some(foreign) =
            responses.iter().find(|response| &response.survey_instance_id != instance)
        {
            return Err(GatewayError::Invalid(format!(
                "response belongs to another instance: {}",
                foreign.survey_instance_id
            )));
        }
        state.ensure_editable(instance)?;
        let updated = {
            let row = state.transition(instance, SubmissionStatus::SubmitRequested)?;
            row.submitted_at = Some(row.updated_at);
            row.clone()
        };
        let kept: Vec<ResponseRowKey> = responses
            .iter()
            .map(|response| {
                (instance.clone(), response.question_id.clone(), response.iteration.get())
            })
            .collect();
        state.responses.retain(|key, _| &key.0 != instance || kept.contains(key));
        for response in responses {
            state.upsert_response(response);
        }
        drop(state);
        Ok(updated)
    }

    fn enqueue_transmission(
        &self,
        instance: &SurveyInstanceId,
        filename: &str,
    ) -> Result<TransmissionRecord, GatewayError> {
        self.lock()?.enqueue(instance, filename)
    }

    fn commit_export(
        &self,
        instance: &SurveyInstanceId,
        filenames: &[String],
    ) -> Result<Vec<TransmissionRecord>, GatewayError> {
        let mut state = self.lock()?;
        let current = state
            .instances
            .get(instance)
            .map(|row| row.status)
            .ok_or_else(|| GatewayError::NotFound(format!("survey instance {instance}")))?;
        if !current.can_transition_to(SubmissionStatus::Submitted) {
            return Err(GatewayError::InvalidTransition {
                instance: instance.to_string(),
                from: current.as_str(),
                to: SubmissionStatus::Submitted.as_str(),
            });
        }
        let mut records = Vec::with_capacity(filenames.len());
        for filename in filenames {
            records.push(state.enqueue(instance, filename)?);
        }
        state.transition(instance, SubmissionStatus::Submitted)?;
        drop(state);
        Ok(records)
    }

    fn transmissions_for_instance(
        &self,
        instance: &SurveyInstanceId,
    ) -> Result<Vec<TransmissionRecord>, GatewayError> {
        Ok(self
            .lock()?
            .transmissions
            .values()
            .filter(|record| &record.survey_instance_id == instance)
            .cloned()
            .collect())
    }

    fn pending_transmissions(&self) -> Result<Vec<TransmissionRecord>, GatewayError> {
        Ok(self
            .lock()?
            .transmissions
            .values()
            .filter(|record| record.status.is_pending())
            .cloned()
            .collect())
    }

    fn update_transmission(
        &self,
        id: TransmissionId,
        status: TransmissionStatus,
        checksum: Option<&HashDigest>,
        error: Option<&str>,
    ) -> Result<TransmissionRecord, GatewayError> {
        let mut state = self.lock()?;
        let record = state
            .transmissions
            .get_mut(&id.get())
            .ok_or_else(|| GatewayError::NotFound(format!("transmission {id}")))?;
        if status == TransmissionStatus::InProgress {
            record.attempts = record.attempts.saturating_add(1);
        }
        if let Some(checksum) = checksum {
            record.checksum = Some(checksum.clone());
        }
        record.status = status;
        record.last_error = error.map(str::to_string);
        record.updated_at = Timestamp::now();
        let updated = record.clone();
        drop(state);
        Ok(updated)
    }

    fn requeue_missing_file(
        &self,
        filename: &str,
    ) -> Result<Vec<TransmissionRecord>, GatewayError> {
        let mut state = self.lock()?;
        let now = Timestamp::now();
        let mut touched = Vec::new();
        for record in state.transmissions.values_mut() {
            if record.filename != filename || record.status.is_terminal() {
                continue;
            }
            record.status = TransmissionStatus::Queued;
            record.updated_at = now;
            touched.push(record.clone());
        }
        for record in &touched {
            if let Some(instance) = state.instances.get_mut(&record.survey_instance_id)
                && instance.status == SubmissionStatus::Uploaded
            {
                instance.status = SubmissionStatus::Submitted;
                instance.updated_at = now;
            }
        }
        drop(state);
        Ok(touched)
    }

    fn pending_transmission_count(&self, form: &FormId) -> Result<usize, GatewayError> {
        Ok(self
            .lock()?
            .transmissions
            .values()
            .filter(|record| &record.form_id == form && record.status.is_pending())
            .count())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;
    use crate::core::FormVersion;
    use crate::core::Iteration;
    use crate::core::ResponseType;

    fn instance(id: &str) -> SurveyInstance {
        let now = Timestamp::now();
        SurveyInstance {
            id: SurveyInstanceId::new(id),
            form_id: FormId::new("form-1"),
            form_version: FormVersion::parse("1").unwrap(),
            status: SubmissionStatus::Saved,
            created_at: now,
            submitted_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn enqueue_is_idempotent_per_instance_and_filename() {
        let gateway = InMemoryGateway::new();
        gateway.create_instance(&instance("a")).unwrap();
        let id = SurveyInstanceId::new("a");
        let first = gateway.enqueue_transmission(&id, "a.zip").unwrap();
        let second = gateway.enqueue_transmission(&id, "a.zip").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(gateway.transmissions_for_instance(&id).unwrap().len(), 1);
    }

    #[test]
    fn responses_are_frozen_after_submission_is_requested() {
        let gateway = InMemoryGateway::new();
        gateway.create_instance(&instance("a")).unwrap();
        let id = SurveyInstanceId::new("a");
        let answer = |value: &str| {
            QuestionResponse::new(
                id.clone(),
                QuestionId::new("q1"),
                Iteration::NONE,
                value,
                ResponseType::Value,
            )
        };
        gateway.save_response(&answer("draft")).unwrap();
        gateway.commit_submission(&id, &gateway.responses(&id).unwrap()).unwrap();

        let edit = gateway.save_response(&answer("tampered")).unwrap_err();
        assert!(matches!(edit, GatewayError::Frozen { status: "submit_requested", .. }));
        let key = ResponseKey::new(QuestionId::new("q1"), Iteration::NONE);
        assert!(matches!(gateway.delete_response(&id, &key), Err(GatewayError::Frozen { .. })));
        assert!(matches!(gateway.commit_submission(&id, &[]), Err(GatewayError::Frozen { .. })));
        assert_eq!(gateway.responses(&id).unwrap()[0].value, "draft");
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let gateway = InMemoryGateway::new();
        gateway.create_instance(&instance("a")).unwrap();
        let err = gateway
            .set_instance_status(&SurveyInstanceId::new("a"), SubmissionStatus::Uploaded)
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidTransition { .. }));
    }

    #[test]
    fn missing_file_requeues_and_reverts_upload() {
        let gateway = InMemoryGateway::new();
        gateway.create_instance(&instance("a")).unwrap();
        let id = SurveyInstanceId::new("a");
        gateway.commit_submission(&id, &[]).unwrap();
        let records = gateway.commit_export(&id, &["a.zip".to_string()]).unwrap();
        gateway
            .update_transmission(records[0].id, TransmissionStatus::Synced, None, None)
            .unwrap();
        gateway.set_instance_status(&id, SubmissionStatus::Uploaded).unwrap();

        let touched = gateway.requeue_missing_file("a.zip").unwrap();
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].status, TransmissionStatus::Queued);
        assert_eq!(gateway.instance(&id).unwrap().unwrap().status, SubmissionStatus::Submitted);
    }
}

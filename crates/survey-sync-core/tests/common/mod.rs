// crates/survey-sync-core/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared doubles and fixtures for survey-sync-core tests.
// Purpose: Provide scripted form servers, artifact stores, and form payloads.
// Dependencies: survey-sync-core, serde_json, tempfile
// ============================================================================

//! ## Overview
//! Scripted doubles for the network seams plus helpers that build form
//! archives and a fully wired pipeline over an in-memory gateway and
//! temp-dir files.

#![allow(
    dead_code,
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::unwrap_in_result,
    reason = "Test helpers are selectively used and may panic on broken fixtures."
)]

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use survey_sync_core::ArtifactStore;
use survey_sync_core::DeviceId;
use survey_sync_core::DirectoryFiles;
use survey_sync_core::Form;
use survey_sync_core::FormHeader;
use survey_sync_core::FormId;
use survey_sync_core::FormServer;
use survey_sync_core::FormVersion;
use survey_sync_core::HashDigest;
use survey_sync_core::InMemoryGateway;
use survey_sync_core::InstalledForm;
use survey_sync_core::Iteration;
use survey_sync_core::NetworkError;
use survey_sync_core::NotifyAction;
use survey_sync_core::PendingFiles;
use survey_sync_core::PersistenceGateway;
use survey_sync_core::PipelineConfig;
use survey_sync_core::PipelineServices;
use survey_sync_core::QuestionId;
use survey_sync_core::QuestionResponse;
use survey_sync_core::ResourceId;
use survey_sync_core::ResponseStore;
use survey_sync_core::ResponseType;
use survey_sync_core::RetryPolicy;
use survey_sync_core::SubmissionStatus;
use survey_sync_core::SurveyGroupId;
use survey_sync_core::SurveyInstance;
use survey_sync_core::SurveyInstanceId;
use survey_sync_core::Timestamp;
use survey_sync_core::TransmissionPipeline;
use survey_sync_core::UploadAck;
use survey_sync_core::runtime::FixedStorageProbe;
use survey_sync_core::runtime::MemoryAuditSink;
use survey_sync_core::runtime::archive;
use tempfile::TempDir;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Device used across tests.
pub fn device() -> DeviceId {
    DeviceId::new("device-1")
}

/// Builds a header for a form in survey group `sg`.
pub fn header(form_id: &str, version: &str) -> FormHeader {
    FormHeader {
        id: FormId::new(form_id),
        survey_group_id: SurveyGroupId::new("sg"),
        survey_group_name: "Water points".to_string(),
        name: format!("Form {form_id}"),
        version: FormVersion::parse(version).unwrap(),
        language: "en".to_string(),
    }
}

/// Builds a form definition with one group holding `questions`.
pub fn form_json(form_id: &str, version: &str, questions: &Value) -> Value {
    json!({
        "id": form_id,
        "version": version,
        "name": format!("Form {form_id}"),
        "groups": [{"id": "g1", "questions": questions}]
    })
}

/// Packs a definition into a form archive.
pub fn form_archive(definition: &Value) -> Vec<u8> {
    let entry = format!("{}.json", definition["id"].as_str().unwrap());
    let body = definition.to_string();
    archive::build(&[(entry.as_str(), body.as_bytes())]).unwrap()
}

// ============================================================================
// SECTION: Scripted Form Server
// ============================================================================

/// Form server double with scripted responses.
#[derive(Default)]
pub struct ScriptedServer {
    /// Published headers by form id.
    pub headers: Mutex<BTreeMap<FormId, FormHeader>>,
    /// Form archives by form id.
    pub archives: Mutex<BTreeMap<FormId, Vec<u8>>>,
    /// Resource archives by resource id.
    pub resources: Mutex<BTreeMap<ResourceId, Vec<u8>>>,
    /// Queued notify failures by filename, consumed in order.
    pub notify_failures: Mutex<BTreeMap<String, VecDeque<NetworkError>>>,
    /// Successful notifications in order.
    pub notified: Mutex<Vec<(NotifyAction, String)>>,
    /// Report returned by `fetch_pending_files`.
    pub pending: Mutex<PendingFiles>,
    /// Number of archive downloads.
    pub downloads: Mutex<usize>,
    /// Artificial delay for archive downloads.
    pub download_delay: Mutex<Duration>,
}

impl ScriptedServer {
    /// Publishes a form version.
    pub fn publish(&self, definition: &Value) {
        let form_id = definition["id"].as_str().unwrap();
        let version = definition["version"].as_str().unwrap();
        self.headers.lock().unwrap().insert(FormId::new(form_id), header(form_id, version));
        self.archives.lock().unwrap().insert(FormId::new(form_id), form_archive(definition));
    }

    /// Removes a form so its header returns 404.
    pub fn unpublish(&self, form_id: &str) {
        self.headers.lock().unwrap().remove(&FormId::new(form_id));
        self.archives.lock().unwrap().remove(&FormId::new(form_id));
    }

    /// Queues a failure for the next notify of `filename`.
    pub fn fail_notify(&self, filename: &str, err: NetworkError) {
        self.notify_failures
            .lock()
            .unwrap()
            .entry(filename.to_string())
            .or_default()
            .push_back(err);
    }

    /// Returns the filenames announced so far.
    pub fn notified_files(&self) -> Vec<String> {
        self.notified.lock().unwrap().iter().map(|(_, name)| name.clone()).collect()
    }
}

impl FormServer for ScriptedServer {
    fn fetch_form_header(
        &self,
        form_id: &FormId,
        _device_id: &DeviceId,
    ) -> Result<FormHeader, NetworkError> {
        self.headers
            .lock()
            .unwrap()
            .get(form_id)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(form_id.to_string()))
    }

    fn fetch_form_headers(&self, _device_id: &DeviceId) -> Result<Vec<FormHeader>, NetworkError> {
        Ok(self.headers.lock().unwrap().values().cloned().collect())
    }

    fn download_form_archive(&self, form_id: &FormId) -> Result<Vec<u8>, NetworkError> {
        let delay = *self.download_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        *self.downloads.lock().unwrap() += 1;
        self.archives
            .lock()
            .unwrap()
            .get(form_id)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(form_id.to_string()))
    }

    fn download_resource_archive(&self, resource_id: &ResourceId) -> Result<Vec<u8>, NetworkError> {
        self.resources
            .lock()
            .unwrap()
            .get(resource_id)
            .cloned()
            .ok_or_else(|| NetworkError::Transient(format!("resource {resource_id} unavailable")))
    }

    fn notify_file_available(
        &self,
        action: NotifyAction,
        _form_id: &FormId,
        filename: &str,
        _device_id: &DeviceId,
    ) -> Result<(), NetworkError> {
        let scripted =
            self.notify_failures.lock().unwrap().get_mut(filename).and_then(VecDeque::pop_front);
        if let Some(err) = scripted {
            return Err(err);
        }
        self.notified.lock().unwrap().push((action, filename.to_string()));
        Ok(())
    }

    fn fetch_pending_files(
        &self,
        _form_ids: &[FormId],
        _device_id: &DeviceId,
    ) -> Result<PendingFiles, NetworkError> {
        Ok(std::mem::take(&mut *self.pending.lock().unwrap()))
    }
}

// ============================================================================
// SECTION: Recording Artifact Store
// ============================================================================

/// Content-addressed artifact store double.
#[derive(Default)]
pub struct RecordingArtifacts {
    /// Stored checksums by destination key.
    pub objects: Mutex<BTreeMap<String, HashDigest>>,
    /// Number of writes that created or replaced an object.
    pub writes: Mutex<usize>,
    /// Visibility of stored objects by destination key.
    pub public: Mutex<BTreeMap<String, bool>>,
}

impl RecordingArtifacts {
    /// Returns the number of object writes.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

impl ArtifactStore for RecordingArtifacts {
    fn upload_artifact(
        &self,
        destination_key: &str,
        _bytes: &[u8],
        checksum: &HashDigest,
        _content_type: &str,
        public: bool,
    ) -> Result<UploadAck, NetworkError> {
        let mut objects = self.objects.lock().unwrap();
        if objects.get(destination_key) == Some(checksum) {
            return Ok(UploadAck {
                already_present: true,
            });
        }
        objects.insert(destination_key.to_string(), checksum.clone());
        self.public.lock().unwrap().insert(destination_key.to_string(), public);
        *self.writes.lock().unwrap() += 1;
        Ok(UploadAck {
            already_present: false,
        })
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Fully wired engine over in-memory persistence and temp-dir files.
pub struct Harness {
    /// Temp directory holding local files.
    pub dir: TempDir,
    /// Persistence gateway.
    pub gateway: Arc<InMemoryGateway>,
    /// Local files.
    pub files: Arc<DirectoryFiles>,
    /// Scripted form server.
    pub server: Arc<ScriptedServer>,
    /// Recording artifact store.
    pub artifacts: Arc<RecordingArtifacts>,
    /// Recording audit sink.
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    /// Creates a harness with empty state.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let files = DirectoryFiles::new(
            dir.path().join("data"),
            dir.path().join("media"),
            dir.path().join("resources"),
        )
        .unwrap();
        Self {
            dir,
            gateway: Arc::new(InMemoryGateway::new()),
            files: Arc::new(files),
            server: Arc::new(ScriptedServer::default()),
            artifacts: Arc::new(RecordingArtifacts::default()),
            audit: Arc::new(MemoryAuditSink::default()),
        }
    }

    /// Builds a pipeline reporting `available` free bytes.
    pub fn pipeline(&self, available: u64) -> TransmissionPipeline {
        let services = PipelineServices {
            gateway: self.gateway.clone(),
            server: self.server.clone(),
            artifacts: self.artifacts.clone(),
            files: self.files.clone(),
            probe: Arc::new(FixedStorageProbe(available)),
            audit: self.audit.clone(),
            device_id: device(),
        };
        TransmissionPipeline::new(services, PipelineConfig {
            workers: 2,
            retry: RetryPolicy {
                attempts: 2,
                backoff: Duration::ZERO,
            },
            min_free_bytes: 100 * 1024 * 1024,
        })
    }

    /// Writes a media file into the media directory.
    pub fn write_media(&self, filename: &str, bytes: &[u8]) {
        std::fs::write(self.files.media_dir().join(filename), bytes).unwrap();
    }

    /// Installs the photo survey form directly into the gateway.
    pub fn install_photo_form(&self, form_id: &str) -> Arc<Form> {
        let definition = photo_form(form_id);
        let form = Form::from_json(definition.to_string().as_bytes()).unwrap();
        self.gateway
            .install_form(&InstalledForm {
                header: header(form_id, "1.0"),
                definition: Some(form.clone()),
                help_downloaded: true,
                deleted: false,
                installed_at: Timestamp::now(),
            })
            .unwrap();
        Arc::new(form)
    }

    /// Creates a saved instance and fills its answers, one photo per name.
    pub fn answered_instance(
        &self,
        form: &Arc<Form>,
        instance_id: &str,
        photos: &[&str],
    ) -> ResponseStore {
        let id = SurveyInstanceId::new(instance_id);
        let now = Timestamp::now();
        self.gateway
            .create_instance(&SurveyInstance {
                id: id.clone(),
                form_id: form.id().clone(),
                form_version: form.version().clone(),
                status: SubmissionStatus::Saved,
                created_at: now,
                submitted_at: None,
                updated_at: now,
            })
            .unwrap();
        let mut store = ResponseStore::new(Arc::clone(form), id.clone());
        store
            .put(QuestionResponse::new(
                id.clone(),
                QuestionId::new("name"),
                Iteration::NONE,
                "Well 7",
                ResponseType::Value,
            ))
            .unwrap();
        for (index, photo) in photos.iter().enumerate() {
            let question = if index == 0 { "photo_a" } else { "photo_b" };
            self.write_media(photo, photo.as_bytes());
            store
                .put(
                    QuestionResponse::new(
                        id.clone(),
                        QuestionId::new(question),
                        Iteration::NONE,
                        *photo,
                        ResponseType::Image,
                    )
                    .with_filename(*photo),
                )
                .unwrap();
        }
        store
    }
}

/// Photo survey with a mandatory name and two optional photos.
pub fn photo_form(form_id: &str) -> Value {
    form_json(
        form_id,
        "1.0",
        &json!([
            {"id": "name", "type": "free_text", "mandatory": true},
            {"id": "photo_a", "type": "photo"},
            {"id": "photo_b", "type": "photo"}
        ]),
    )
}

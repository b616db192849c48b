// crates/survey-sync-core/src/runtime/forms.rs
// ============================================================================
// Module: Survey Sync Form Manager
// Description: Form version skew detection, download, and install.
// Purpose: Keep locally installed forms aligned with the server.
// Dependencies: crate::{core, interfaces, runtime}, thiserror
// ============================================================================

//! ## Overview
//! [`FormSyncManager`] drives the per-form state machine
//! `unknown -> header fetched -> up to date | update needed -> installed`.
//! An update is needed only when the server version is strictly newer than
//! the installed one; forms are never downgraded. Installs are single-flight
//! per form id, so concurrent triggers for the same form share one download.
//! A bootstrap bundle read from disk installs forms and resources through
//! the same version rule without contacting the server.
//!
//! Invariants:
//! - A failure for one form never aborts its siblings in a batch.
//! - A 404 on the header of a previously installed form marks it deleted.
//! - A definition that fails to parse never replaces a usable installed one.
//!   With nothing usable installed, a header-only row with
//!   `help_downloaded = false` records the version and the next sync retries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::core::DeviceId;
use crate::core::Form;
use crate::core::FormHeader;
use crate::core::FormId;
use crate::core::FormVersion;
use crate::core::InstalledForm;
use crate::core::ResourceId;
use crate::core::Timestamp;
use crate::core::version::update_needed;
use crate::interfaces::FileStore;
use crate::interfaces::FormServer;
use crate::interfaces::GatewayError;
use crate::interfaces::NetworkError;
use crate::interfaces::PersistenceGateway;
use crate::runtime::archive;
use crate::runtime::audit::SyncAuditEvent;
use crate::runtime::audit::SyncAuditEventParams;
use crate::runtime::audit::SyncAuditSink;
use crate::runtime::audit::SyncOutcome;
use crate::runtime::single_flight::SingleFlight;

// ============================================================================
// SECTION: Outcomes & Errors
// ============================================================================

/// Result of syncing one form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormSyncOutcome {
    /// The installed version is current.
    UpToDate {
        /// Form identifier.
        form_id: FormId,
        /// Installed version.
        version: FormVersion,
    },
    /// A new version was installed.
    Installed {
        /// Form identifier.
        form_id: FormId,
        /// Installed version.
        version: FormVersion,
        /// Whether every resource archive was installed.
        help_downloaded: bool,
    },
    /// The server no longer publishes the form; it was marked deleted.
    Deleted {
        /// Form identifier.
        form_id: FormId,
    },
}

impl FormSyncOutcome {
    /// Returns the form identifier.
    #[must_use]
    pub const fn form_id(&self) -> &FormId {
        match self {
            Self::UpToDate {
                form_id, ..
            }
            | Self::Installed {
                form_id, ..
            }
            | Self::Deleted {
                form_id,
            } => form_id,
        }
    }
}

/// Errors raised while syncing one form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormSyncError {
    /// Network call failed.
    #[error(transparent)]
    Network(#[from] NetworkError),
    /// Persistence failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The definition could not be parsed; a usable installed version is kept.
    #[error("form definition for {form_id} could not be parsed: {message}")]
    Parse {
        /// Form identifier.
        form_id: FormId,
        /// Parse failure detail.
        message: String,
    },
    /// The server does not know a form that was never installed.
    #[error("form not found upstream: {0}")]
    NotFound(FormId),
    /// A bootstrap bundle could not be read.
    #[error("bootstrap bundle unreadable: {0}")]
    Bundle(String),
}

/// Per-form results of a batch sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSyncReport {
    /// Successful outcomes in processing order.
    pub outcomes: Vec<FormSyncOutcome>,
    /// Failures in processing order.
    pub failures: Vec<(FormId, FormSyncError)>,
}

impl FormSyncReport {
    /// Returns the ids of forms installed by the batch.
    #[must_use]
    pub fn installed(&self) -> Vec<&FormId> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, FormSyncOutcome::Installed { .. }))
            .map(FormSyncOutcome::form_id)
            .collect()
    }

    /// Records one form result.
    fn push(&mut self, form_id: FormId, result: Result<FormSyncOutcome, FormSyncError>) {
        match result {
            Ok(outcome) => self.outcomes.push(outcome),
            Err(err) => self.failures.push((form_id, err)),
        }
    }
}

/// Batch sync failure, reported after every form was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormSyncBatchError {
    /// The list of assigned forms could not be fetched.
    #[error("form listing failed: {0}")]
    Listing(FormSyncError),
    /// At least one form failed; the report holds every result.
    #[error("{} form(s) failed to sync", .0.failures.len())]
    Partial(FormSyncReport),
}

// ============================================================================
// SECTION: Form Sync Manager
// ============================================================================

/// Downloads and installs forms, serializing work per form id.
pub struct FormSyncManager {
    /// Persistence gateway.
    gateway: Arc<dyn PersistenceGateway>,
    /// Form distribution endpoint.
    server: Arc<dyn FormServer>,
    /// Local resource files.
    files: Arc<dyn FileStore>,
    /// Audit sink for install events.
    audit: Arc<dyn SyncAuditSink>,
    /// Device identity sent with header requests.
    device_id: DeviceId,
    /// Single-flight coalescer keyed by form id.
    flights: SingleFlight<FormId, Result<FormSyncOutcome, FormSyncError>>,
}

impl FormSyncManager {
    /// Creates a form sync manager.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        server: Arc<dyn FormServer>,
        files: Arc<dyn FileStore>,
        audit: Arc<dyn SyncAuditSink>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            gateway,
            server,
            files,
            audit,
            device_id,
            flights: SingleFlight::new(),
        }
    }

    /// Fetches one form header and installs the form when it is out of date.
    ///
    /// # Errors
    ///
    /// Returns [`FormSyncError`] when the header, download, or install fails.
    pub fn load_form(&self, form_id: &FormId) -> Result<FormSyncOutcome, FormSyncError> {
        self.flights.run(form_id, || self.fetch_and_install(form_id))
    }

    /// Installs a form from an already fetched header when it is out of date.
    ///
    /// # Errors
    ///
    /// Returns [`FormSyncError`] when the download or install fails.
    pub fn install_header(&self, header: &FormHeader) -> Result<FormSyncOutcome, FormSyncError> {
        self.flights.run(&header.id, || self.install_if_needed(header))
    }

    /// Re-syncs every listed form independently.
    ///
    /// # Errors
    ///
    /// Returns [`FormSyncBatchError::Partial`] after all ids were tried when at
    /// least one failed.
    pub fn reload_forms(&self, form_ids: &[FormId]) -> Result<FormSyncReport, FormSyncBatchError> {
        let mut report = FormSyncReport::default();
        for form_id in form_ids {
            report.push(form_id.clone(), self.load_form(form_id));
        }
        finish_batch(report)
    }

    /// Re-syncs every installed form that is not marked deleted.
    ///
    /// # Errors
    ///
    /// Returns [`FormSyncBatchError`] when listing fails or any form fails.
    pub fn reload_installed_forms(&self) -> Result<FormSyncReport, FormSyncBatchError> {
        let ids = self.active_form_ids().map_err(FormSyncBatchError::Listing)?;
        self.reload_forms(&ids)
    }

    /// Installs every form assigned to the device that needs it.
    ///
    /// # Errors
    ///
    /// Returns [`FormSyncBatchError`] when listing fails or any form fails.
    pub fn sync_assigned_forms(&self) -> Result<FormSyncReport, FormSyncBatchError> {
        let headers = self
            .server
            .fetch_form_headers(&self.device_id)
            .map_err(|err| FormSyncBatchError::Listing(err.into()))?;
        let mut report = FormSyncReport::default();
        for header in &headers {
            report.push(header.id.clone(), self.install_header(header));
        }
        finish_batch(report)
    }

    /// Installs forms and resources from a bootstrap bundle on disk.
    ///
    /// Nested `.zip` entries are resource archives named after their
    /// resource id; they are extracted first. `.json` entries are form
    /// definitions named after their form id, installed unless an equal or
    /// newer usable version is present. Other entries are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FormSyncBatchError::Listing`] when the bundle cannot be read
    /// and [`FormSyncBatchError::Partial`] after every form was tried when at
    /// least one failed.
    pub fn install_bootstrap(&self, path: &Path) -> Result<FormSyncReport, FormSyncBatchError> {
        let unreadable =
            |message: String| FormSyncBatchError::Listing(FormSyncError::Bundle(message));
        let bytes =
            fs::read(path).map_err(|err| unreadable(format!("{}: {err}", path.display())))?;
        let entries = archive::read_files(&bytes).map_err(|err| unreadable(err.to_string()))?;
        let mut bundled = Vec::new();
        for (name, contents) in &entries {
            let Some(stem) = name.strip_suffix(".zip") else {
                continue;
            };
            let resource = ResourceId::new(stem);
            match self.files.install_resource(&resource, contents) {
                Ok(()) => bundled.push(resource),
                Err(err) => self.emit(
                    "resource_install_failed",
                    SyncOutcome::Failed,
                    SyncAuditEventParams {
                        message: Some(format!("{resource}: {err}")),
                        ..SyncAuditEventParams::default()
                    },
                ),
            }
        }
        let mut report = FormSyncReport::default();
        for (name, contents) in &entries {
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let form_id = FormId::new(stem);
            let result = self.install_bundled(&form_id, contents, &bundled);
            report.push(form_id, result);
        }
        finish_batch(report)
    }

    /// Marks forms deleted upstream. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the write fails.
    pub fn mark_deleted(&self, form_ids: &[FormId]) -> Result<Vec<FormId>, GatewayError> {
        let mut marked = Vec::new();
        for form_id in form_ids {
            if self.gateway.mark_form_deleted(form_id)? {
                self.emit("form_deleted", SyncOutcome::Ok, form_params(form_id, None, None));
                marked.push(form_id.clone());
            }
        }
        Ok(marked)
    }

    /// Physically removes deleted forms that no pending transmission references.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when a read or delete fails.
    pub fn purge_deleted_forms(&self) -> Result<Vec<FormId>, GatewayError> {
        let mut purged = Vec::new();
        for form_id in self.gateway.form_ids()? {
            let Some(form) = self.gateway.form(&form_id)? else {
                continue;
            };
            if !form.deleted {
                continue;
            }
            let pending = self.gateway.pending_transmission_count(&form_id)?;
            if pending > 0 {
                self.emit(
                    "form_purge_deferred",
                    SyncOutcome::Skipped,
                    form_params(&form_id, None, Some(format!("{pending} pending transmission(s)"))),
                );
                continue;
            }
            self.gateway.delete_form(&form_id)?;
            self.emit("form_purged", SyncOutcome::Ok, form_params(&form_id, None, None));
            purged.push(form_id);
        }
        Ok(purged)
    }

    /// Returns installed form ids not marked deleted.
    fn active_form_ids(&self) -> Result<Vec<FormId>, FormSyncError> {
        let mut ids = Vec::new();
        for form_id in self.gateway.form_ids()? {
            if self.gateway.form(&form_id)?.is_some_and(|form| !form.deleted) {
                ids.push(form_id);
            }
        }
        Ok(ids)
    }

    /// Fetches a header, handling upstream deletion of known forms.
    fn fetch_and_install(&self, form_id: &FormId) -> Result<FormSyncOutcome, FormSyncError> {
        match self.server.fetch_form_header(form_id, &self.device_id) {
            Ok(header) => self.install_if_needed(&header),
            Err(NetworkError::NotFound(_)) => {
                if self.gateway.mark_form_deleted(form_id)? {
                    self.emit("form_deleted", SyncOutcome::Ok, form_params(form_id, None, None));
                    Ok(FormSyncOutcome::Deleted {
                        form_id: form_id.clone(),
                    })
                } else {
                    Err(FormSyncError::NotFound(form_id.clone()))
                }
            }
            Err(err) => {
                self.emit(
                    "form_header_failed",
                    SyncOutcome::Failed,
                    form_params(form_id, None, Some(err.to_string())),
                );
                Err(err.into())
            }
        }
    }

    /// Compares versions and installs when the server version is newer.
    ///
    /// Only a row carrying a parsed definition counts as installed, so a
    /// header-only row left by a failed parse is retried.
    fn install_if_needed(&self, header: &FormHeader) -> Result<FormSyncOutcome, FormSyncError> {
        let usable = self.gateway.form(&header.id)?.filter(|form| form.definition.is_some());
        if let Some(installed) = &usable
            && !update_needed(Some(installed.version()), &header.version)
        {
            return Ok(FormSyncOutcome::UpToDate {
                form_id: header.id.clone(),
                version: installed.version().clone(),
            });
        }
        self.install(header, usable.is_some())
    }

    /// Downloads, parses, and persists a form version.
    ///
    /// When the new definition fails to parse and a usable definition is
    /// already installed, the stored row is left untouched.
    fn install(
        &self,
        header: &FormHeader,
        has_usable: bool,
    ) -> Result<FormSyncOutcome, FormSyncError> {
        let version = Some(header.version.to_string());
        self.gateway.upsert_survey_group(&header.survey_group_id, &header.survey_group_name)?;
        let archive_bytes = self.server.download_form_archive(&header.id).inspect_err(|err| {
            self.emit(
                "form_download_failed",
                SyncOutcome::Failed,
                form_params(&header.id, version.clone(), Some(err.to_string())),
            );
        })?;
        let form = match parse_form_archive(header, &archive_bytes) {
            Ok(form) => form,
            Err(message) => {
                if !has_usable {
                    self.gateway.install_form(&InstalledForm {
                        header: header.clone(),
                        definition: None,
                        help_downloaded: false,
                        deleted: false,
                        installed_at: Timestamp::now(),
                    })?;
                }
                self.emit(
                    "form_parse_failed",
                    SyncOutcome::Rejected,
                    form_params(&header.id, version, Some(message.clone())),
                );
                return Err(FormSyncError::Parse {
                    form_id: header.id.clone(),
                    message,
                });
            }
        };
        let help_downloaded = self.install_resources(header, &form);
        self.store_definition(header, form, help_downloaded, "form_installed")
    }

    /// Parses one bundled definition and installs it under the form's flight.
    fn install_bundled(
        &self,
        form_id: &FormId,
        json: &[u8],
        bundled: &[ResourceId],
    ) -> Result<FormSyncOutcome, FormSyncError> {
        let form = parse_definition(form_id, json).map_err(|message| {
            self.emit(
                "form_parse_failed",
                SyncOutcome::Rejected,
                form_params(form_id, None, Some(message.clone())),
            );
            FormSyncError::Parse {
                form_id: form_id.clone(),
                message,
            }
        })?;
        self.flights.run(form_id, || self.install_local(form, bundled))
    }

    /// Installs a bundled definition unless an equal or newer one is usable.
    ///
    /// A definition without a survey group keeps the group of any row
    /// already stored for the form.
    fn install_local(
        &self,
        form: Form,
        bundled: &[ResourceId],
    ) -> Result<FormSyncOutcome, FormSyncError> {
        let mut header = form.implied_header();
        if let Some(installed) = self.gateway.form(&header.id)? {
            if installed.definition.is_some()
                && !update_needed(Some(installed.version()), &header.version)
            {
                return Ok(FormSyncOutcome::UpToDate {
                    form_id: header.id,
                    version: installed.version().clone(),
                });
            }
            if form.definition().survey_group_id.is_none() {
                header.survey_group_id = installed.header.survey_group_id;
                header.survey_group_name = installed.header.survey_group_name;
            }
        }
        let help_downloaded = form.resources().iter().all(|resource| bundled.contains(resource));
        self.gateway.upsert_survey_group(&header.survey_group_id, &header.survey_group_name)?;
        self.store_definition(&header, form, help_downloaded, "form_bootstrapped")
    }

    /// Persists a parsed definition and flags its survey group as unseen.
    fn store_definition(
        &self,
        header: &FormHeader,
        form: Form,
        help_downloaded: bool,
        event: &'static str,
    ) -> Result<FormSyncOutcome, FormSyncError> {
        self.gateway.install_form(&InstalledForm {
            header: header.clone(),
            definition: Some(form),
            help_downloaded,
            deleted: false,
            installed_at: Timestamp::now(),
        })?;
        self.gateway.set_survey_group_viewed(&header.survey_group_id, false)?;
        let version = Some(header.version.to_string());
        self.emit(event, SyncOutcome::Ok, form_params(&header.id, version, None));
        Ok(FormSyncOutcome::Installed {
            form_id: header.id.clone(),
            version: header.version.clone(),
            help_downloaded,
        })
    }

    /// Downloads and extracts every resource archive. Returns true when all
    /// succeeded; failures are audited and do not stop the install.
    fn install_resources(&self, header: &FormHeader, form: &Form) -> bool {
        let mut complete = true;
        for resource in form.resources() {
            let result = self
                .server
                .download_resource_archive(resource)
                .map_err(|err| err.to_string())
                .and_then(|bytes| {
                    self.files.install_resource(resource, &bytes).map_err(|err| err.to_string())
                });
            if let Err(message) = result {
                complete = false;
                self.emit(
                    "resource_install_failed",
                    SyncOutcome::Failed,
                    form_params(&header.id, None, Some(format!("{resource}: {message}"))),
                );
            }
        }
        complete
    }

    /// Records an audit event.
    fn emit(&self, event: &'static str, outcome: SyncOutcome, params: SyncAuditEventParams) {
        self.audit.record(&SyncAuditEvent::new(event, outcome, params));
    }
}

/// Converts a batch report into the batch result.
fn finish_batch(report: FormSyncReport) -> Result<FormSyncReport, FormSyncBatchError> {
    if report.failures.is_empty() { Ok(report) } else { Err(FormSyncBatchError::Partial(report)) }
}

/// Extracts and validates the definition carried by a form archive.
fn parse_form_archive(header: &FormHeader, bytes: &[u8]) -> Result<Form, String> {
    let entry = format!("{}.json", header.id);
    let json = archive::read_entry(bytes, &entry).map_err(|err| err.to_string())?;
    parse_definition(&header.id, &json)
}

/// Decodes a definition and checks it carries the expected form id.
fn parse_definition(form_id: &FormId, json: &[u8]) -> Result<Form, String> {
    let form = Form::from_json(json).map_err(|err| err.to_string())?;
    if form.id() != form_id {
        return Err(format!("definition id {} does not match expected id {form_id}", form.id()));
    }
    Ok(form)
}

/// Builds audit parameters for a form event.
fn form_params(
    form_id: &FormId,
    form_version: Option<String>,
    message: Option<String>,
) -> SyncAuditEventParams {
    SyncAuditEventParams {
        form_id: Some(form_id.to_string()),
        form_version,
        message,
        ..SyncAuditEventParams::default()
    }
}

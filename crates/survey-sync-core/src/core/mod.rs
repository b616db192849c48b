// crates/survey-sync-core/src/core/mod.rs
// ============================================================================
// Module: Survey Sync Core Types
// Description: Canonical form, response, and sync-state structures.
// Purpose: Provide stable, serializable types shared by every Survey Sync crate.
// Dependencies: bigdecimal, serde, sha2
// ============================================================================

//! ## Overview
//! Core types define the questionnaire model, responses and their encodings,
//! persisted lifecycle records, and artifact classification. They carry no
//! I/O; runtime components and gateways build on them.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod artifact;
pub mod dependency;
pub mod form;
pub mod hashing;
pub mod identifiers;
pub mod response;
pub mod state;
pub mod time;
pub mod version;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use artifact::ArtifactKind;
pub use artifact::NotifyAction;
pub use artifact::ResolvedArtifact;
pub use dependency::Dependency;
pub use form::Form;
pub use form::FormDefinition;
pub use form::FormError;
pub use form::FormHeader;
pub use form::Level;
pub use form::Question;
pub use form::QuestionGroup;
pub use form::QuestionOption;
pub use form::QuestionType;
pub use form::QuestionView;
pub use form::RuleViolation;
pub use form::ValidationRule;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use identifiers::DeviceId;
pub use identifiers::FormId;
pub use identifiers::GroupId;
pub use identifiers::QuestionId;
pub use identifiers::ResourceId;
pub use identifiers::SurveyGroupId;
pub use identifiers::SurveyInstanceId;
pub use identifiers::TransmissionId;
pub use response::Iteration;
pub use response::OptionValue;
pub use response::QuestionResponse;
pub use response::ResponseKey;
pub use response::ResponseKeyError;
pub use response::ResponseType;
pub use state::InstalledForm;
pub use state::SubmissionStatus;
pub use state::SurveyGroup;
pub use state::SurveyInstance;
pub use state::TransmissionRecord;
pub use state::TransmissionStatus;
pub use time::Timestamp;
pub use version::FormVersion;
pub use version::VersionError;

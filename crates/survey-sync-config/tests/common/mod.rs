// crates/survey-sync-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across survey-sync-config integration tests.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use survey_sync_config::ConfigError;
use survey_sync_config::SurveySyncConfig;

/// Smallest configuration that passes validation.
pub const MINIMAL_TOML: &str = r#"
[device]
id = "device-7"

[server]
base_url = "https://forms.example.org/api"

[upload]
bucket = "survey-artifacts"
"#;

/// Returns a minimal config with all defaults applied.
pub fn minimal_config() -> Result<SurveySyncConfig, ConfigError> {
    SurveySyncConfig::from_toml(MINIMAL_TOML)
}

/// Asserts that `result` failed with a message containing `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> Result<(), String> {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

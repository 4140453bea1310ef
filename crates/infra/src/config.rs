//! Configuration loading and representation.

use serde::{Deserialize, Serialize};

use busbridge_core::{BridgeError, BridgeResult};

pub const DEFAULT_CAUSATION_ID_KEY: &str = "_causation_id";
pub const DEFAULT_CAUSATION_NAME_KEY: &str = "_causation_name";

pub const ENV_CAUSATION_ID_KEY: &str = "BUSBRIDGE_CAUSATION_ID_KEY";
pub const ENV_CAUSATION_NAME_KEY: &str = "BUSBRIDGE_CAUSATION_NAME_KEY";

/// Metadata keys the causation enricher writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CausationConfig {
    pub causation_id_key: String,
    pub causation_name_key: String,
}

impl Default for CausationConfig {
    fn default() -> Self {
        Self {
            causation_id_key: DEFAULT_CAUSATION_ID_KEY.to_string(),
            causation_name_key: DEFAULT_CAUSATION_NAME_KEY.to_string(),
        }
    }
}

impl CausationConfig {
    /// Defaults, overridden by `BUSBRIDGE_CAUSATION_ID_KEY` / `BUSBRIDGE_CAUSATION_NAME_KEY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            causation_id_key: lookup(ENV_CAUSATION_ID_KEY).unwrap_or(defaults.causation_id_key),
            causation_name_key: lookup(ENV_CAUSATION_NAME_KEY)
                .unwrap_or(defaults.causation_name_key),
        }
    }

    pub fn with_causation_id_key(mut self, key: impl Into<String>) -> Self {
        self.causation_id_key = key.into();
        self
    }

    pub fn with_causation_name_key(mut self, key: impl Into<String>) -> Self {
        self.causation_name_key = key.into();
        self
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.causation_id_key.is_empty() {
            return Err(BridgeError::invalid_configuration("causation id key must not be empty"));
        }
        if self.causation_name_key.is_empty() {
            return Err(BridgeError::invalid_configuration("causation name key must not be empty"));
        }
        Ok(())
    }
}

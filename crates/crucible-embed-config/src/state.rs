//! Persisted plugin state: settings plus per-block collapse flags

use crate::error::ConfigError;
use crate::settings::EmbedSettings;
use crate::store::SettingsStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// The blob saved through the host's settings persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Settings fields, flattened into the top level of the blob
    #[serde(flatten)]
    pub settings: EmbedSettings,

    /// Block identity -> collapsed
    #[serde(rename = "collapseStates", default)]
    pub collapse_states: BTreeMap<String, bool>,
}

impl PersistedState {
    /// Decode a blob, tolerating unknown fields and missing ones.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let mut state: Self = serde_json::from_value(value)?;
        state.settings = state.settings.sanitized();
        Ok(state)
    }

    /// Encode into the persisted layout.
    pub fn to_value(&self) -> Result<serde_json::Value, ConfigError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Load from `store`, falling back to defaults when the blob is missing or corrupt.
    pub async fn load_from(store: &dyn SettingsStore) -> Self {
        match store.load().await {
            Ok(Some(value)) => match Self::from_value(value) {
                Ok(state) => {
                    debug!(
                        collapse_entries = state.collapse_states.len(),
                        "Loaded persisted state"
                    );
                    state
                }
                Err(e) => {
                    warn!("Persisted state is unreadable, using defaults: {}", e);
                    Self::default()
                }
            },
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Failed to load persisted state, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// Save to `store`.
    pub async fn save_to(&self, store: &dyn SettingsStore) -> Result<(), ConfigError> {
        let value = self.to_value()?;
        store.save(&value).await
    }
}

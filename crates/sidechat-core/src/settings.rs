//! API credential and model selection.

use serde_json::Value;
use thiserror::Error;

use crate::error::ChatError;
use crate::model::DEFAULT_MODEL;
use crate::store::{self, KeyValueStore, API_KEY, MODEL_KEY};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl Settings {
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self, ChatError> {
        let api_key = store::get_string(store, API_KEY).await?.unwrap_or_default();
        let model = store::get_string(store, MODEL_KEY)
            .await?
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self { api_key, model })
    }

    /// An empty key means the user still has to visit settings.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn masked_key(&self) -> String {
        mask_api_key(&self.api_key)
    }
}

/// Key with everything but the last four characters masked.
pub fn mask_api_key(key: &str) -> String {
    let len = key.chars().count();
    if len == 0 {
        String::new()
    } else if len <= 4 {
        "*".repeat(len)
    } else {
        let last_four: String = key.chars().skip(len - 4).collect();
        format!("{}...{}", "*".repeat((len - 4).min(20)), last_four)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Please enter your OpenAI API key")]
    EmptyApiKey,

    #[error(transparent)]
    Store(#[from] ChatError),
}

pub const SAVED_MESSAGE: &str = "Settings saved successfully";

/// Saves the settings form. Nothing is written when the key is blank.
pub async fn save_settings(
    store: &dyn KeyValueStore,
    api_key_input: &str,
    model: &str,
) -> Result<Settings, SettingsError> {
    let api_key = api_key_input.trim();
    if api_key.is_empty() {
        return Err(SettingsError::EmptyApiKey);
    }

    store.set(API_KEY, Value::String(api_key.to_string())).await?;
    store.set(MODEL_KEY, Value::String(model.to_string())).await?;

    Ok(Settings {
        api_key: api_key.to_string(),
        model: model.to_string(),
    })
}

pub async fn save_model(store: &dyn KeyValueStore, model: &str) -> Result<(), ChatError> {
    store.set(MODEL_KEY, Value::String(model.to_string())).await
}

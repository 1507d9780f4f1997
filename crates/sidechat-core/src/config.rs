use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::{Result, anyhow};

use crate::model::ReasoningEffort;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub storage_path: Option<PathBuf>,
    pub max_tokens: u32,
    pub reasoning_effort: ReasoningEffort,
    pub stream: bool,
    /// Rows from the bottom that still count as "following" the transcript.
    pub scroll_threshold: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            storage_path: None,
            max_tokens: 4000,
            reasoning_effort: ReasoningEffort::Medium,
            stream: true,
            scroll_threshold: 2,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::default().with_env_overrides());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config.with_env_overrides())
    }

    /// Where settings and the conversation are stored.
    pub fn resolve_storage_path(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("storage.json")),
        }
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("OPENAI_BASE_URL") {
            let endpoint = endpoint.trim_end_matches('/');
            if !endpoint.is_empty() {
                self.endpoint = format!("{}/chat/completions", endpoint);
            }
        }
        self
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("sidechat"))
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}

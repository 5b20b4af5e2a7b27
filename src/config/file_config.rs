use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Backend (can override CLI)
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub per_page: Option<u32>,
    pub request_timeout_sec: Option<u64>,

    // Arrival effects
    pub sound_enabled: Option<bool>,
    pub desktop_notifications_enabled: Option<bool>,

    pub reconnect: Option<ReconnectConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter: Option<f64>,
    pub max_attempts: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

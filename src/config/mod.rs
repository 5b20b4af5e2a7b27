mod file_config;

pub use file_config::{FileConfig, ReconnectConfig};

use crate::notifications::{StoreSettings, DEFAULT_PER_PAGE};
use crate::realtime::ReconnectPolicy;
use anyhow::{bail, Result};

pub const DEFAULT_REQUEST_TIMEOUT_SEC: u64 = 30;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub per_page: u32,
    pub request_timeout_sec: u64,
    pub sound_enabled: bool,
    pub desktop_notifications_enabled: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            ws_url: None,
            token: None,
            user_id: None,
            per_page: DEFAULT_PER_PAGE,
            request_timeout_sec: DEFAULT_REQUEST_TIMEOUT_SEC,
            sound_enabled: true,
            desktop_notifications_enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Backend
    pub api_base_url: String,
    pub ws_url: String,
    pub token: String,
    pub user_id: String,
    pub per_page: u32,
    pub request_timeout_sec: u64,

    // Arrival effects
    pub sound_enabled: bool,
    pub desktop_notifications_enabled: bool,

    pub reconnect: ReconnectSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let api_base_url = file
            .api_base_url
            .or_else(|| cli.api_base_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("api_base_url must be specified via --api-url or in config file")
            })?;
        let api_base_url = api_base_url.trim_end_matches('/').to_string();
        if let Err(e) = reqwest::Url::parse(&api_base_url) {
            bail!("Invalid api_base_url {:?}: {}", api_base_url, e);
        }

        let ws_url = match file.ws_url.or_else(|| cli.ws_url.clone()) {
            Some(url) => url,
            None => derive_ws_url(&api_base_url)?,
        };

        let token = file
            .token
            .or_else(|| cli.token.clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow::anyhow!("token must be specified via --token or in config file"))?;
        let user_id = file
            .user_id
            .or_else(|| cli.user_id.clone())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("user_id must be specified via --user-id or in config file")
            })?;

        let per_page = file.per_page.unwrap_or(cli.per_page);
        if per_page == 0 {
            bail!("per_page must be greater than 0");
        }
        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        if request_timeout_sec == 0 {
            bail!("request_timeout_sec must be greater than 0");
        }

        let sound_enabled = file.sound_enabled.unwrap_or(cli.sound_enabled);
        let desktop_notifications_enabled = file
            .desktop_notifications_enabled
            .unwrap_or(cli.desktop_notifications_enabled);

        // Reconnect settings - merge file config with defaults
        let rc_file = file.reconnect.unwrap_or_default();
        let defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            initial_delay_ms: rc_file.initial_delay_ms.unwrap_or(defaults.initial_delay_ms),
            max_delay_ms: rc_file.max_delay_ms.unwrap_or(defaults.max_delay_ms),
            multiplier: rc_file.multiplier.unwrap_or(defaults.multiplier),
            jitter: rc_file.jitter.unwrap_or(defaults.jitter),
            max_attempts: rc_file.max_attempts.or(defaults.max_attempts),
        };
        reconnect.validate()?;

        Ok(Self {
            api_base_url,
            ws_url,
            token,
            user_id,
            per_page,
            request_timeout_sec,
            sound_enabled,
            desktop_notifications_enabled,
            reconnect,
        })
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            per_page: self.per_page,
            sound_enabled: self.sound_enabled,
            desktop_enabled: self.desktop_notifications_enabled,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(&self.reconnect)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_attempts: Option<u32>, // None retries forever
}

impl ReconnectSettings {
    fn validate(&self) -> Result<()> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            bail!("reconnect.multiplier must be >= 1.0, got {}", self.multiplier);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            bail!("reconnect.jitter must be within [0, 1], got {}", self.jitter);
        }
        if self.max_delay_ms < self.initial_delay_ms {
            bail!(
                "reconnect.max_delay_ms ({}) must not be below initial_delay_ms ({})",
                self.max_delay_ms,
                self.initial_delay_ms
            );
        }
        Ok(())
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5000,
            max_delay_ms: 60000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

/// Push endpoint next to the REST API: same host and path, websocket scheme.
fn derive_ws_url(api_base_url: &str) -> Result<String> {
    let rest = if let Some(rest) = api_base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        bail!(
            "Cannot derive ws_url from {:?}, set it explicitly",
            api_base_url
        );
    };
    Ok(format!("{}/ws", rest))
}

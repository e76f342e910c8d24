use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::realtime::{ConnectionSettings, ExponentialBackoff, TypingSettings};

pub const API_URL_ENV: &str = "CHATROOM_API_URL";
pub const WS_URL_ENV: &str = "CHATROOM_WS_URL";

const APP_DIR: &str = "chatroom";
const CONFIG_FILE: &str = "config.json";

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine the user config directory")]
    NoConfigDir,
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Redirects every config and credentials file to `dir`. Only the first
/// call has an effect.
pub fn set_config_dir_override(dir: PathBuf) -> bool {
    CONFIG_DIR_OVERRIDE.set(dir).is_ok()
}

pub fn config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE.get() {
        return Ok(dir.clone());
    }
    Ok(dirs::config_dir().ok_or(ConfigError::NoConfigDir)?.join(APP_DIR))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub connect_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub typing_throttle_ms: u64,
    pub typing_stop_delay_ms: u64,
    /// Remote typing indicators older than this are dropped.
    pub typing_expiry_ms: u64,
    pub extend_typing_on_keystroke: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/".to_string(),
            ws_url: "ws://localhost:8000/chat_ws".to_string(),
            connect_timeout_ms: 1000,
            max_retries: 10,
            backoff_base_ms: 1000,
            backoff_max_ms: 10_000,
            typing_throttle_ms: 5000,
            typing_stop_delay_ms: 5000,
            typing_expiry_ms: 30_000,
            extend_typing_on_keystroke: false,
        }
    }
}

impl ClientConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        Ok(config_dir()?.join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = serde_json::from_reader(file).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Missing file means defaults; a malformed one is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io { path: parent.to_path_buf(), source })?;
        }
        let file = File::create(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        serde_json::to_writer_pretty(file, self).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn apply_overrides(&mut self, api_url: Option<String>, ws_url: Option<String>) {
        if let Some(url) = api_url {
            self.api_url = url;
        }
        if let Some(url) = ws_url {
            self.ws_url = url;
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(std::env::var(API_URL_ENV).ok(), std::env::var(WS_URL_ENV).ok());
    }

    pub fn connection_settings(&self, cookie: Option<String>) -> ConnectionSettings {
        ConnectionSettings {
            url: self.ws_url.clone(),
            cookie,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_retries: self.max_retries,
            backoff: Arc::new(ExponentialBackoff {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
            }),
        }
    }

    pub fn typing_settings(&self) -> TypingSettings {
        TypingSettings {
            throttle: Duration::from_millis(self.typing_throttle_ms),
            stop_delay: Duration::from_millis(self.typing_stop_delay_ms),
            extend_on_keystroke: self.extend_typing_on_keystroke,
        }
    }

    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.typing_expiry_ms)
    }
}

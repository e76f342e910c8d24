use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chatroom::config;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const COOKIE_ENV: &str = "CHATROOM_COOKIE";

/// Session cookie cached per backend. Stored base64-encoded, not encrypted.
#[derive(Serialize, Deserialize, Clone)]
pub struct Credentials {
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl Credentials {
    pub fn new(api_url: &str, cookie: &str) -> Self {
        Credentials {
            api_url: api_url.to_string(),
            cookie: Some(BASE64.encode(cookie)),
        }
    }

    pub fn get_cookie(&self) -> Option<String> {
        let encoded = self.cookie.as_ref()?;
        let bytes = BASE64.decode(encoded).ok()?;
        String::from_utf8(bytes).ok().filter(|c| !c.is_empty())
    }
}

fn credentials_path() -> Result<PathBuf> {
    Ok(config::config_dir()?.join("credentials.json"))
}

pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    save_credentials_to(&credentials_path()?, credentials)
}

pub fn load_credentials() -> Result<Option<Credentials>> {
    load_credentials_from(&credentials_path()?)
}

fn save_credentials_to(path: &Path, credentials: &Credentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, credentials)?;
    info!("Session cookie saved for {}", credentials.api_url);
    Ok(())
}

fn load_credentials_from(path: &Path) -> Result<Option<Credentials>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let credentials: Credentials = serde_json::from_reader(file)?;
    info!("Loaded cached session for {} from {}", credentials.api_url, path.display());
    Ok(Some(credentials))
}

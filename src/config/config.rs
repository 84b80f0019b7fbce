// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::catalog::LanguageSelection;
use crate::utils::validate_base_url;

const ENV_PREFIX: &str = "ANIME_VA_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding all locally persisted keys
    pub state_db_path: PathBuf,

    /// Remote profile state service base URL
    pub sync_api_url: String,

    /// Optional API key sent as `X-API-Key`
    pub sync_api_key: Option<String>,

    /// Device tag attached to pushed updates. Generated and persisted when unset.
    pub device_id: Option<String>,

    /// Directory holding `anime_va_eng.json` and `anime_va_jpn.json`
    pub catalog_dir: PathBuf,

    /// Catalog language used when no preference was persisted ("ENG", "JPN" or "BOTH")
    pub default_language: String,

    /// Base URL prefixed to bare catalog image file names
    pub image_base_url: String,

    /// Cache-busting tag appended to resolved image URLs
    pub image_version: Option<String>,

    /// Local API bind address (e.g., "127.0.0.1:8080")
    pub local_api_bind: SocketAddr,

    /// Maximum number of queued updates sent in one push
    pub flush_batch_size: usize,

    /// Background fetch + flush interval in seconds, 0 disables the tick
    pub sync_interval_secs: u64,

    /// Transport timeout for remote requests
    pub request_timeout_secs: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format: "pretty" or "json"
    pub log_format: String,
}

impl Config {
    /// Load configuration from TOML file with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var(format!("{ENV_PREFIX}CONFIG"))
            .unwrap_or_else(|_| "config.toml".to_string());

        let mut config = Self::load_file(Path::new(&config_path))?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Read a TOML file, falling back to defaults when it does not exist
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Config::default())
        }
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Some(val) = env_override("STATE_DB_PATH") {
            self.state_db_path = PathBuf::from(val);
        }
        if let Some(val) = env_override("SYNC_API_URL") {
            self.sync_api_url = val;
        }
        if let Some(val) = env_override("SYNC_API_KEY") {
            self.sync_api_key = Some(val).filter(|v| !v.is_empty());
        }
        if let Some(val) = env_override("DEVICE_ID") {
            self.device_id = Some(val).filter(|v| !v.is_empty());
        }
        if let Some(val) = env_override("CATALOG_DIR") {
            self.catalog_dir = PathBuf::from(val);
        }
        if let Some(val) = env_override("DEFAULT_LANGUAGE") {
            self.default_language = val;
        }
        if let Some(val) = env_override("IMAGE_BASE_URL") {
            self.image_base_url = val;
        }
        if let Some(val) = env_override("IMAGE_VERSION") {
            self.image_version = Some(val).filter(|v| !v.is_empty());
        }
        if let Some(val) = env_override("LOCAL_API_BIND") {
            self.local_api_bind = SocketAddr::from_str(&val)?;
        }
        if let Some(val) = env_override("FLUSH_BATCH_SIZE") {
            self.flush_batch_size = val.parse()?;
        }
        if let Some(val) = env_override("SYNC_INTERVAL_SECS") {
            self.sync_interval_secs = val.parse()?;
        }
        if let Some(val) = env_override("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = val.parse()?;
        }
        if let Some(val) = env_override("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = env_override("LOG_FORMAT") {
            self.log_format = val;
        }

        Ok(())
    }

    /// Reject values that would only fail later at runtime
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_base_url(&self.sync_api_url)?;

        if self.flush_batch_size == 0 {
            return Err(anyhow::anyhow!("flush_batch_size must be at least 1"));
        }

        self.default_language.parse::<LanguageSelection>()?;

        match self.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(anyhow::anyhow!(
                    "Invalid log_format: {} (expected \"pretty\" or \"json\")",
                    other
                ));
            }
        }

        Ok(())
    }
}

fn env_override(field: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{field}")).ok()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_db_path: PathBuf::from("anime-va-state.db"),
            sync_api_url: String::from("http://localhost:8000"),
            sync_api_key: None,
            device_id: None,
            catalog_dir: PathBuf::from("data"),
            default_language: String::from("ENG"),
            image_base_url: String::from("http://localhost:8000/images"),
            image_version: None,
            local_api_bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            flush_batch_size: 50,
            sync_interval_secs: 300, // 5 minutes
            request_timeout_secs: 30,
            log_level: String::from("info"),
            log_format: String::from("pretty"),
        }
    }
}

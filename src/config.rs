//! Configuration loading and management.
//!
//! Lookup order for the YAML file:
//! 1. `--config` / `TASKFLOW_CONFIG_PATH`
//! 2. `./taskflow.yaml`
//! 3. `~/.taskflow/config.yaml`
//!
//! Environment variables are applied on top of whatever was loaded:
//! `TASKFLOW_DB_PATH`, `TASKFLOW_MEDIA_DIR`, `TASKFLOW_HOST`, `TASKFLOW_PORT`,
//! `TASKFLOW_PAGE_SIZE`, `TASKFLOW_MAX_PAGE_SIZE`, `TASKFLOW_TIMEZONE`,
//! `TASKFLOW_MAX_UPLOAD_BYTES`.

use anyhow::{Context, Result, anyhow, bail};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "TASKFLOW_CONFIG_PATH";
const PROJECT_CONFIG_FILE: &str = "taskflow.yaml";

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for uploaded attachment files.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Page size used when a request does not ask for one.
    #[serde(default = "default_page_size")]
    pub page_size: i64,

    /// Upper bound on the requested page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,

    /// Timezone for day-bucketed due date filters: `UTC` or `±HH:MM`.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Request body limit for uploads, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            media_dir: default_media_dir(),
            host: default_host(),
            port: default_port(),
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            timezone: default_timezone(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".taskflow/taskflow.db")
}

fn default_media_dir() -> PathBuf {
    PathBuf::from(".taskflow/media")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_page_size() -> i64 {
    20
}

fn default_max_page_size() -> i64 {
    100
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

/// Parse `UTC`, `Z`, or a fixed offset such as `+03:00`.
pub fn parse_timezone(value: &str) -> Result<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("invalid UTC offset"));
    }
    value
        .parse::<FixedOffset>()
        .map_err(|e| anyhow!("Invalid timezone '{}': {} (expected UTC or ±HH:MM)", value, e))
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Find and load the config file, then apply environment overrides.
    /// Returns the path of the file used, if any.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let (mut config, used) = if let Some(path) = explicit {
            (Self::load(&path)?, Some(path))
        } else {
            let candidates = [
                Some(PathBuf::from(PROJECT_CONFIG_FILE)),
                dirs::home_dir().map(|home| home.join(".taskflow").join("config.yaml")),
            ];
            match candidates.into_iter().flatten().find(|p| p.is_file()) {
                Some(path) => (Self::load(&path)?, Some(path)),
                None => (Self::default(), None),
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok((config, used))
    }

    /// Apply `TASKFLOW_*` overrides from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = &mut self.server;

        if let Some(v) = lookup("TASKFLOW_DB_PATH") {
            server.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("TASKFLOW_MEDIA_DIR") {
            server.media_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("TASKFLOW_HOST") {
            server.host = v;
        }
        if let Some(v) = lookup("TASKFLOW_PORT") {
            server.port = v.parse().context("TASKFLOW_PORT must be a port number")?;
        }
        if let Some(v) = lookup("TASKFLOW_PAGE_SIZE") {
            server.page_size = v.parse().context("TASKFLOW_PAGE_SIZE must be an integer")?;
        }
        if let Some(v) = lookup("TASKFLOW_MAX_PAGE_SIZE") {
            server.max_page_size = v
                .parse()
                .context("TASKFLOW_MAX_PAGE_SIZE must be an integer")?;
        }
        if let Some(v) = lookup("TASKFLOW_TIMEZONE") {
            server.timezone = v;
        }
        if let Some(v) = lookup("TASKFLOW_MAX_UPLOAD_BYTES") {
            server.max_upload_bytes = v
                .parse()
                .context("TASKFLOW_MAX_UPLOAD_BYTES must be an integer")?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        parse_timezone(&self.server.timezone)?;
        if self.server.max_page_size < 1 {
            bail!("max_page_size must be at least 1");
        }
        if self.server.page_size < 1 || self.server.page_size > self.server.max_page_size {
            bail!(
                "page_size must be between 1 and max_page_size ({}), got {}",
                self.server.max_page_size,
                self.server.page_size
            );
        }
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_timezone(&self.server.timezone)
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn ensure_media_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.server.media_dir)?;
        Ok(())
    }
}

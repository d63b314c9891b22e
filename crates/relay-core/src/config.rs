use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

/// Storage key holding the bearer token.
pub const TOKEN_STORAGE_KEY: &str = "relay_id_token";
/// Storage key holding the theme preference used while signed out.
pub const THEME_STORAGE_KEY: &str = "relay-theme";

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Locates the persistent client state directory.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs =
            ProjectDirs::from("app", "relay", "relay-rs").ok_or(ConfigError::MissingProjectDirs)?;
        Self::from_root(dirs.config_dir().to_path_buf())
    }

    /// Use an explicit directory, creating it with user-only permissions.
    pub fn from_root(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    /// Path of the file backing a single storage key.
    pub fn storage_file(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Runtime settings for the client, sourced from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub poll_interval: Duration,
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Read `RELAY_API_URL`, `RELAY_POLL_INTERVAL_SECS` and `RELAY_PAGE_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("RELAY_API_URL").filter(|v| !v.trim().is_empty()) {
            config.api_url = Url::parse(raw.trim())
                .map_err(|err| ConfigError::InvalidValue("RELAY_API_URL", err.to_string()))?;
        }

        if let Some(raw) = lookup("RELAY_POLL_INTERVAL_SECS").filter(|v| !v.trim().is_empty()) {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RELAY_POLL_INTERVAL_SECS", raw.clone()))?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue("RELAY_POLL_INTERVAL_SECS", raw));
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("RELAY_PAGE_SIZE").filter(|v| !v.trim().is_empty()) {
            let size: u32 = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RELAY_PAGE_SIZE", raw.clone()))?;
            config.page_size = size.clamp(1, MAX_PAGE_SIZE);
        }

        Ok(config)
    }
}

/// Errors that can occur when working with configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for relay-rs")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid value for {0}: '{1}'")]
    InvalidValue(&'static str, String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

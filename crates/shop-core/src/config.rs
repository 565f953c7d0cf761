use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_KDF_ROUNDS: u32 = 100_000;
pub const DEFAULT_DISCOVERY_URL: &str = "https://discovery.sapmobilesecure.com";
pub const DEFAULT_APP_CONFIG_ID: &str = "com.sap.mobile.apps.shop:1.0";

/// Application-specific configuration helpers.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs =
            ProjectDirs::from("app", "shop", "shop-rs").ok_or(ConfigError::MissingProjectDirs)?;
        let config_dir = dirs.config_dir();
        fs::create_dir_all(config_dir).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(config_dir)?;
        Ok(Self {
            root: config_dir.to_path_buf(),
        })
    }

    /// Use an explicit root directory, creating it if needed.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Encrypted secure store blob.
    pub fn secure_store_file(&self) -> PathBuf {
        self.root.join("secure-store.json")
    }

    /// Directory backing the key/value persistence collaborator.
    pub fn persistence_dir(&self) -> PathBuf {
        self.root.join("preferences")
    }

    /// Default location read by the file configuration provider.
    pub fn configuration_file(&self) -> PathBuf {
        self.root.join("ConfigurationProvider.json")
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

/// Tunables shared by the onboarding and login flows.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Upper bound for every network round trip (token exchange, discovery, policy).
    pub network_timeout: Duration,
    /// How long the app may stay in the background before the store must be unlocked again.
    pub lock_timeout: Duration,
    /// PBKDF2 iteration count used when provisioning or re-keying the secure store.
    pub kdf_rounds: u32,
    pub discovery_url: Url,
    pub app_config_id: String,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            network_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            kdf_rounds: DEFAULT_KDF_ROUNDS,
            discovery_url: Url::parse(DEFAULT_DISCOVERY_URL).expect("valid discovery URL"),
            app_config_id: DEFAULT_APP_CONFIG_ID.to_owned(),
        }
    }
}

impl FlowSettings {
    /// Defaults overridden by `SHOP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(secs) = read_env("SHOP_NETWORK_TIMEOUT_SECS") {
            settings.network_timeout = Duration::from_secs(parse_number(
                "SHOP_NETWORK_TIMEOUT_SECS",
                &secs,
            )?);
        }

        if let Some(secs) = read_env("SHOP_LOCK_TIMEOUT_SECS") {
            settings.lock_timeout =
                Duration::from_secs(parse_number("SHOP_LOCK_TIMEOUT_SECS", &secs)?);
        }

        if let Some(rounds) = read_env("SHOP_KDF_ROUNDS") {
            let rounds = parse_number("SHOP_KDF_ROUNDS", &rounds)?;
            settings.kdf_rounds = u32::try_from(rounds).map_err(|_| ConfigError::InvalidValue {
                name: "SHOP_KDF_ROUNDS",
                value: rounds.to_string(),
            })?;
        }

        if let Some(url) = read_env("SHOP_DISCOVERY_URL") {
            settings.discovery_url = Url::parse(&url).map_err(|_| ConfigError::InvalidValue {
                name: "SHOP_DISCOVERY_URL",
                value: url,
            })?;
        }

        if let Some(id) = read_env("SHOP_APP_CONFIG_ID") {
            settings.app_config_id = id;
        }

        Ok(settings)
    }
}

fn read_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_owned(),
    })
}

/// Errors that can occur when working with configuration directories.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for shop-rs")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

//! Configuration for the server

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sharestore::{DriverOptions, FlushStrategy, ShareAddress};

/// Environment variable naming the settings share.
pub const ENV_SETTINGS_SHARE: &str = "SETTINGSSHARE";
/// Environment variable overriding the data directory.
pub const ENV_DATA_DIR: &str = "SHARESTORE_DATA_DIR";

/// Server configuration
///
/// The config is usually loaded from a file with [`Self::load`] and then overridden from
/// the environment with [`Self::apply_env`]. The [`Default`] config hosts nothing and
/// stores its data in the platform data directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Share whose documents list the shares to host.
    pub settings_share: Option<ShareAddress>,
    /// Shares that are always hosted.
    pub shares: Vec<ShareAddress>,
    /// Directory for the share database. Defaults to [`Self::default_data_dir`].
    pub data_dir: Option<PathBuf>,
    /// When replicas write their documents to storage.
    pub flush: FlushConfig,
    /// Where replicas are stored.
    pub storage: StorageConfig,
}

/// Flush strategy of the hosted replicas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FlushConfig {
    /// Write on every upsert.
    #[default]
    Immediate,
    /// Write once upserts pause for `delay`.
    Debounced {
        /// Quiet period, e.g. `"500ms"`.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Write on shutdown only.
    Manual,
}

impl From<FlushConfig> for FlushStrategy {
    fn from(config: FlushConfig) -> Self {
        match config {
            FlushConfig::Immediate => FlushStrategy::Immediate,
            FlushConfig::Debounced { delay } => FlushStrategy::Debounced(delay),
            FlushConfig::Manual => FlushStrategy::Manual,
        }
    }
}

/// Storage of the hosted replicas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageConfig {
    /// A database file in the data directory.
    #[default]
    Persistent,
    /// Process memory, lost on shutdown.
    Memory,
}

impl Config {
    /// Load the config from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        let config: Config = toml::from_str(&s)?;
        Ok(config)
    }

    /// Override settings from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| env::var_os(name))
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<OsString>) -> Result<()> {
        if let Some(share) = var(ENV_SETTINGS_SHARE) {
            let share = share
                .into_string()
                .map_err(|_| anyhow!("{ENV_SETTINGS_SHARE} is not valid unicode"))?;
            let share: ShareAddress = share
                .parse()
                .with_context(|| format!("invalid {ENV_SETTINGS_SHARE}"))?;
            self.settings_share = Some(share);
        }
        if let Some(dir) = var(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// The platform data directory for the server.
    pub fn default_data_dir() -> Result<PathBuf> {
        let path = dirs_next::data_dir().ok_or_else(|| {
            anyhow!("operating environment provides no directory for application data")
        })?;
        Ok(path.join("sharestore"))
    }

    /// Get the data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_data_dir(),
        }
    }

    /// Get the path to the share database file.
    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("shares-1.db"))
    }

    /// Options for every hosted driver.
    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            flush: self.flush.into(),
        }
    }
}

// Installer runtime settings
//
// Layered with the `config` crate: built-in defaults, then an optional TOML file,
// then `SPINSTALL_*` environment variables (e.g. `SPINSTALL_CONNECT_TIMEOUT_SECS=5`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::security::master_key::DEFAULT_KDF_ITERATIONS;
use crate::utils::path_resolver;

pub const ENV_PREFIX: &str = "SPINSTALL";

#[derive(Debug, Clone, Deserialize)]
pub struct InstallerSettings {
    /// Where the application config document is written.
    pub config_file: PathBuf,
    /// Log directory. Unset means the per-user default.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub kdf_iterations: u32,
    pub default_site_lang: String,
}

impl InstallerSettings {
    /// Load settings, optionally from `file` (missing file is an error only when given).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let default_config = path_resolver::resolve_config_file()?;

        let mut builder = config::Config::builder()
            .set_default("config_file", default_config.to_string_lossy().into_owned())?
            .set_default("connect_timeout_secs", 20_i64)?
            .set_default("kdf_iterations", i64::from(DEFAULT_KDF_ITERATIONS))?
            .set_default("default_site_lang", "en_US")?;

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let settings: InstallerSettings = builder
            .build()
            .context("Failed to build installer settings")?
            .try_deserialize()
            .context("Failed to parse installer settings")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be greater than zero");
        }
        if self.kdf_iterations == 0 {
            anyhow::bail!("kdf_iterations must be greater than zero");
        }
        if self.default_site_lang.trim().is_empty() {
            anyhow::bail!("default_site_lang cannot be empty");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn kdf_iterations(&self) -> NonZeroU32 {
        NonZeroU32::new(self.kdf_iterations)
            .unwrap_or(NonZeroU32::MIN)
    }

    pub fn log_dir(&self) -> Result<PathBuf> {
        match &self.log_dir {
            Some(dir) => Ok(dir.clone()),
            None => path_resolver::resolve_log_folder(),
        }
    }
}

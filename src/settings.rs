//! Application settings.
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional `qax.{yaml,toml,json}` file in the settings directory, then
//! `QAX_*` environment variables (e.g. `QAX_PROFILE_DIR`, `QAX_DEBUG`).

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base name of the optional settings file.
pub const SETTINGS_FILE_STEM: &str = "qax";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaxSettings {
    /// Directory holding one profile document per file.
    pub profile_dir: Utf8PathBuf,

    /// Directory for rotating log files.
    pub log_dir: Utf8PathBuf,

    #[serde(default)]
    pub debug: bool,

    /// Executable launched as the isolated worker. Defaults to the running
    /// executable.
    #[serde(default)]
    pub worker_exe: Option<Utf8PathBuf>,

    /// Wall-clock limit for an isolated run, in seconds.
    #[serde(default)]
    pub worker_timeout_secs: Option<u64>,
}

impl Default for QaxSettings {
    fn default() -> Self {
        Self {
            profile_dir: Utf8PathBuf::from("config"),
            log_dir: Utf8PathBuf::from("logs"),
            debug: false,
            worker_exe: None,
            worker_timeout_secs: None,
        }
    }
}

impl QaxSettings {
    /// Load settings from `settings_dir` and the environment.
    pub fn load(settings_dir: &Utf8Path) -> Result<Self> {
        Self::load_with_env_prefix(settings_dir, "QAX")
    }

    fn load_with_env_prefix(settings_dir: &Utf8Path, env_prefix: &str) -> Result<Self> {
        let defaults = Self::default();
        let settings_file = settings_dir.join(SETTINGS_FILE_STEM);

        let settings: QaxSettings = config::Config::builder()
            .set_default("profile_dir", defaults.profile_dir.as_str())?
            .set_default("log_dir", defaults.log_dir.as_str())?
            .set_default("debug", defaults.debug)?
            .add_source(config::File::with_name(settings_file.as_str()).required(false))
            .add_source(config::Environment::with_prefix(env_prefix).try_parsing(true))
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Failed to deserialize settings")?;

        tracing::debug!(
            "Loaded settings: profile_dir={}, log_dir={}, debug={}",
            settings.profile_dir,
            settings.log_dir,
            settings.debug
        );
        Ok(settings)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        self.worker_timeout_secs.map(Duration::from_secs)
    }
}

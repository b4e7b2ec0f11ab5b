use crate::models::Profile;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// File extensions recognized as profile documents.
pub const PROFILE_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

static GLOBAL_CONFIG: RwLock<Option<Arc<ConfigModel>>> = RwLock::new(None);

/// Errors raised while loading profile configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration directory does not exist: {0}")]
    DirectoryNotFound(Utf8PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(String),

    #[error("Failed to parse profile {path}: {message}")]
    Parse { path: Utf8PathBuf, message: String },

    #[error("Configuration has not been loaded")]
    NotLoaded,
}

/// Parsed profile configuration.
///
/// Every file in the configuration directory with a recognized extension is
/// one profile. Loading is all-or-nothing: one malformed document fails the
/// whole load, and the process-wide model installed by
/// [`load_global`](Self::load_global) is left untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigModel {
    config_dir: Utf8PathBuf,
    profiles: Vec<Profile>,
}

impl ConfigModel {
    /// Load every profile document in `config_dir`, sorted by profile name.
    pub fn load<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound(config_dir));
        }

        let entries = fs::read_dir(&config_dir).map_err(|source| ConfigError::Io {
            path: config_dir.clone(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Io {
                path: config_dir.clone(),
                source,
            })?;
            let path = Utf8PathBuf::try_from(entry.path())
                .map_err(|e| ConfigError::NonUtf8Path(e.into_path_buf().display().to_string()))?;

            if path.is_file() && Self::is_profile_document(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut profiles = paths
            .iter()
            .map(|path| Self::parse_profile(path))
            .collect::<Result<Vec<_>, _>>()?;
        profiles.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(
            "Loaded {} profiles from {}",
            profiles.len(),
            config_dir
        );

        Ok(Self {
            config_dir,
            profiles,
        })
    }

    /// Build a model from already-parsed profiles.
    pub fn from_profiles(config_dir: impl Into<Utf8PathBuf>, mut profiles: Vec<Profile>) -> Self {
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            config_dir: config_dir.into(),
            profiles,
        }
    }

    /// Parse a single profile document, choosing the format by extension.
    pub fn parse_profile(path: &Utf8Path) -> Result<Profile, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed = match path.extension() {
            Some("json") => serde_json::from_str(&contents).map_err(|e| e.to_string()),
            _ => serde_yaml_ng::from_str(&contents).map_err(|e| e.to_string()),
        };

        let profile: Profile = parsed.map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        tracing::debug!(
            "Parsed profile '{}' ({} check tools) from {}",
            profile.name,
            profile.check_tools.len(),
            path
        );
        Ok(profile)
    }

    fn is_profile_document(path: &Utf8Path) -> bool {
        path.extension()
            .is_some_and(|ext| PROFILE_EXTENSIONS.contains(&ext))
    }

    /// Load `config_dir` and install the result as the process-wide model.
    ///
    /// A repeated call replaces the previous model. On failure the previous
    /// model stays installed.
    pub fn load_global<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Arc<Self>, ConfigError> {
        let model = Arc::new(Self::load(config_dir)?);
        let mut slot = GLOBAL_CONFIG.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// The process-wide model, or [`ConfigError::NotLoaded`].
    pub fn global() -> Result<Arc<Self>, ConfigError> {
        GLOBAL_CONFIG
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ConfigError::NotLoaded)
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

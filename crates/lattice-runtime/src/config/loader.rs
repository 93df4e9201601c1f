//! Layered configuration loading.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables `lattice.toml`
//! - `yaml-config`: enables `lattice.yaml` / `lattice.yml`
//!
//! With both enabled, `lattice.toml` is preferred over `lattice.yaml` in the
//! same directory.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`lattice.{profile}.toml` / `.yaml`)
//! 3. Main config file (`lattice.toml` / `lattice.yaml`)
//! 4. Environment variables (`LATTICE_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! Variables use the `LATTICE_` prefix with `__` between nested keys:
//!
//! - `LATTICE_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `LATTICE_OUTBOUND__RATE=5` → `outbound.rate = 5`
//! - `LATTICE_COMMANDS__PREFIXES=["!"]` → `commands.prefixes = ["!"]`
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/lattice.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::LatticeConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "LATTICE_";
const PROFILE_VAR: &str = "LATTICE_PROFILE";
const APP_DIR: &str = "lattice";

/// Main file names, in search order.
const FILE_NAMES: &[&str] = &[
    #[cfg(feature = "toml-config")]
    "lattice.toml",
    #[cfg(feature = "yaml-config")]
    "lattice.yaml",
    #[cfg(feature = "yaml-config")]
    "lattice.yml",
];

/// Selects the `lattice.{profile}.*` file merged under the main file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `prod` and `dev` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            _ => Self::Custom(name.to_string()),
        }
    }

    /// Reads `LATTICE_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Layers defaults, files, the environment and overrides into a
/// [`LatticeConfig`].
pub struct ConfigLoader {
    /// Programmatic overrides, merged last.
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search for configuration files.
    ///
    /// Without any, the current directory and the user config directory
    /// (`~/.config/lattice` on Linux) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a complete configuration over every other source.
    pub fn merge(mut self, config: LatticeConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Sets a single key over every other source, e.g.
    /// `.set("outbound.rate", 5)`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<LatticeConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: LatticeConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(LatticeConfig::default()));

        if let Some(path) = self.config_file.take() {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, &path)?;
        } else {
            let files = self.discover_files();
            if files.is_empty() {
                warn!("No configuration file found, using defaults");
            }
            for path in &files {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, path)?;
            }
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    /// Merges a single config file, dispatching on its extension.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(APP_DIR)))
            .collect()
    }

    /// Files to merge, lowest precedence first.
    ///
    /// Directories are visited in order and, inside each, the file names
    /// of every enabled format. A profile variant (`lattice.{profile}.toml`)
    /// is picked up next to the name it derives from; the search ends at the
    /// first main file.
    fn discover_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for dir in self.resolve_search_paths() {
            for name in FILE_NAMES {
                let Some((stem, ext)) = name.rsplit_once('.') else {
                    continue;
                };
                let profiled = dir.join(format!("{stem}.{}.{ext}", self.profile));
                if profiled.is_file() {
                    debug!(path = %profiled.display(), "Found profile configuration");
                    files.push(profiled);
                }
                let main = dir.join(name);
                if main.is_file() {
                    files.push(main);
                    return files;
                }
            }
        }
        files
    }
}

/// Loads configuration from the default locations and the environment.
pub fn load_config() -> ConfigResult<LatticeConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path`, then the environment.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<LatticeConfig> {
    ConfigLoader::new().file(path).load()
}

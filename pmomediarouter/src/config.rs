//! Configuration du routeur média.
//!
//! The configuration is layered the same way as the rest of PMOMusic:
//! - the embedded `mediarouter.yaml` provides every default,
//! - an optional YAML file is merged over it,
//! - `PMOMEDIAROUTER_CONFIG__SECTION__KEY=value` environment variables win.
//!
//! ```no_run
//! use pmomediarouter::MediaRouterConfig;
//!
//! let config = MediaRouterConfig::load("")?;
//! println!("timeout: {:?}", config.router.route_timeout());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

use crate::errors::MediaRouterError;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("mediarouter.yaml");

const ENV_CONFIG_FILE: &str = "PMOMEDIAROUTER_CONFIG";
const ENV_PREFIX: &str = "PMOMEDIAROUTER_CONFIG__";
const CONFIG_FILE_NAME: &str = "mediarouter.yaml";

const DEFAULT_ROUTE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_PRESENTATION_URL: &str = "https://google.com";
const DEFAULT_THREAD_NAME: &str = "pmomediarouter";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRouterConfig {
    #[serde(default)]
    pub router: RouterSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Timeout handed to the provider for each CreateRoute.
    pub route_timeout_ms: u64,
    pub incognito: bool,
    /// Presentation URL registered with sink discovery.
    ///
    /// Cast sinks are only reported for a non-empty presentation URL.
    pub discovery_presentation_url: String,
    /// Name of the router thread.
    pub thread_name: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            route_timeout_ms: DEFAULT_ROUTE_TIMEOUT_MS,
            incognito: false,
            discovery_presentation_url: DEFAULT_PRESENTATION_URL.to_string(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl RouterSettings {
    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }

    fn validate(&self) -> std::result::Result<(), MediaRouterError> {
        if self.route_timeout_ms == 0 {
            return Err(MediaRouterError::config_error("router.route_timeout_ms must be positive"));
        }
        if self.thread_name.trim().is_empty() {
            return Err(MediaRouterError::config_error("router.thread_name is empty"));
        }
        Ok(())
    }
}

impl MediaRouterConfig {
    /// Loads the configuration.
    ///
    /// The file is searched in the following order:
    /// 1. `path` if not empty
    /// 2. the `PMOMEDIAROUTER_CONFIG` environment variable
    /// 3. `.pmomusic/mediarouter.yaml` in the current directory
    /// 4. `.pmomusic/mediarouter.yaml` in the user's home directory
    ///
    /// A missing file is not an error: the embedded defaults are used.
    pub fn load(path: &str) -> Result<Self> {
        let external = match Self::find_config_file(path) {
            Some(file) => {
                let data = fs::read_to_string(&file)
                    .map_err(|e| anyhow!("Cannot read {}: {}", file.display(), e))?;
                info!(config_file=%file.display(), "Loaded media router config file");
                Some(data)
            }
            None => {
                info!("Media router config file not found, using embedded defaults");
                None
            }
        };

        Self::from_layers(external.as_deref(), env::vars())
    }

    /// Parses a YAML document merged over the embedded defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_layers(Some(yaml), std::iter::empty())
    }

    fn find_config_file(path: &str) -> Option<PathBuf> {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
            info!(env_var = ENV_CONFIG_FILE, path=%env_path, "Trying to load config from env");
            return Some(PathBuf::from(env_path));
        }

        let local = Path::new(".pmomusic").join(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }

        home_dir()
            .map(|home| home.join(".pmomusic").join(CONFIG_FILE_NAME))
            .filter(|p| p.exists())
    }

    fn from_layers<I>(external: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if let Some(yaml) = external {
            let mut layer: Value = serde_yaml::from_str(yaml)?;
            // Un fichier vide se parse en Null: on garde les défauts
            if !layer.is_null() {
                normalize_keys(&mut layer);
                overlay(&mut value, layer);
            }
        }

        apply_env_overrides(&mut value, vars);

        let config: Self = serde_yaml::from_value(value)?;
        config.router.validate()?;
        Ok(config)
    }
}

/// Applies every `PMOMEDIAROUTER_CONFIG__A__B=value` variable to the key
/// path `a.b`, creating missing sections.
fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in vars {
        let Some(path) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let keys: Vec<String> = path.split("__").map(str::to_lowercase).collect();
        if !insert_at(config, &keys, parse_env_value(&raw)) {
            warn!(variable = %name, "Ignoring config override: a parent key is not a section");
        }
    }
}

/// Returns false when a non-mapping node sits on the path.
fn insert_at(root: &mut Value, keys: &[String], value: Value) -> bool {
    let Some((last, parents)) = keys.split_last() else {
        *root = value;
        return true;
    };

    let mut node = root;
    for key in parents {
        let Value::Mapping(section) = node else {
            return false;
        };
        node = section
            .entry(Value::from(key.as_str()))
            .or_insert(Value::Mapping(Mapping::new()));
    }

    match node {
        Value::Mapping(section) => {
            section.insert(Value::from(last.as_str()), value);
            true
        }
        _ => false,
    }
}

// "250" doit devenir un entier, "true" un booléen.
fn parse_env_value(raw: &str) -> Value {
    serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn normalize_keys(value: &mut Value) {
    match value {
        Value::Mapping(section) => {
            for (key, mut child) in std::mem::take(section) {
                normalize_keys(&mut child);
                let key = match key {
                    Value::String(name) => Value::String(name.to_lowercase()),
                    other => other,
                };
                section.insert(key, child);
            }
        }
        Value::Sequence(items) => items.iter_mut().for_each(normalize_keys),
        _ => {}
    }
}

/// Sections are merged key by key; any other value in `layer` replaces the
/// one in `base`.
fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Mapping(base), Value::Mapping(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

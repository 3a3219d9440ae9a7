use std::time::Duration;
use std::{env, fs, path};

use serde::{Deserialize, Serialize};
use watchpost::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Read(std::io::Error),
    #[error("failed to write config file: {0}")]
    Write(std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("no config path available (set XDG_CONFIG_HOME or HOME)")]
    PathUnavailable,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseSection,
    pub engine: EngineSection,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub path: String,
}

/// Engine tuning overrides; every field has a documented default chosen by
/// the engine crate.
#[derive(Debug, Serialize, Deserialize)]
pub struct EngineSection {
    pub probe_timeout_secs: u64,
    pub script_budget_secs: u64,
    pub prompt_timeout_secs: u64,
    pub body_cap_kib: usize,
    pub redirect_cap: usize,
}

impl Default for Config {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            database: DatabaseSection { path: "watchpost.db".into() },
            engine: EngineSection {
                probe_timeout_secs: defaults.probe_timeout.as_secs(),
                script_budget_secs: defaults.script_budget.as_secs(),
                prompt_timeout_secs: defaults.prompt_timeout.as_secs(),
                body_cap_kib: defaults.body_cap / 1024,
                redirect_cap: defaults.redirect_cap,
            },
        }
    }
}

/// Default config path ($XDG_CONFIG_HOME/watchpost/config.toml or
/// $HOME/.config/...).
fn default_config_path() -> Result<path::PathBuf, Error> {
    let base = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Ok(home) = env::var("HOME") {
        path::PathBuf::from(home).join(".config")
    } else {
        return Err(Error::PathUnavailable);
    };

    Ok(base.join("watchpost/config.toml"))
}

impl Config {
    /// Load the config, writing the defaults to disk on first run so the
    /// user has a file to edit.
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path = match optional_path {
            Some(path) => path.as_ref().to_path_buf(),
            None => default_config_path()?,
        };

        if config_path.exists() {
            let raw = fs::read_to_string(&config_path).map_err(Error::Read)?;
            Ok(toml::from_str(&raw)?)
        } else {
            let config = Self::default();
            config.write(&config_path)?;
            Ok(config)
        }
    }

    pub fn write(&self, path: &path::Path) -> Result<(), Error> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::Write)?;
        }
        fs::write(path, raw).map_err(Error::Write)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            probe_timeout: Duration::from_secs(self.engine.probe_timeout_secs),
            body_cap: self.engine.body_cap_kib * 1024,
            redirect_cap: self.engine.redirect_cap,
            script_budget: Duration::from_secs(self.engine.script_budget_secs),
            prompt_timeout: Duration::from_secs(self.engine.prompt_timeout_secs),
        }
    }
}

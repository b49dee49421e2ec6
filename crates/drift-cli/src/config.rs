//! Configuration file handling for drift.
//!
//! Looks for `.config/drift.styx` in the current directory or any parent directory.
//!
//! ```styx
//! migrations_dir db/migrations
//! history_table schema_history
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use facet::Facet;
use std::path::PathBuf;

/// Configuration loaded from `drift.styx`.
#[derive(Debug, Clone, Default, Facet)]
pub struct Config {
    /// Directory holding migration records. Defaults to `migrations`.
    #[facet(default)]
    pub migrations_dir: Option<String>,

    /// Name of the applied-migrations table.
    #[facet(default)]
    pub history_table: Option<String>,

    /// Database URL, overridden by `DATABASE_URL` and `--database-url`.
    #[facet(default)]
    pub database_url: Option<String>,
}

/// Effective settings after config, environment and flags are combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub migrations_dir: Utf8PathBuf,
    pub history_table: String,
    pub database_url: Option<String>,
}

impl Settings {
    /// Later sources win: the config file, then `env_url`, then `flag_url`.
    pub fn resolve(config: Config, env_url: Option<String>, flag_url: Option<String>) -> Self {
        Settings {
            migrations_dir: Utf8PathBuf::from(
                config
                    .migrations_dir
                    .unwrap_or_else(|| "migrations".to_string()),
            ),
            history_table: config
                .history_table
                .unwrap_or_else(|| drift::DEFAULT_HISTORY_TABLE.to_string()),
            database_url: flag_url.or(env_url).or(config.database_url),
        }
    }
}

const CONFIG_FILE: &str = ".config/drift.styx";

/// Load `.config/drift.styx` from the current directory or the nearest
/// parent that has one. `Ok(None)` when there is no config file at all.
pub fn load() -> Result<Option<(Config, Utf8PathBuf)>, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(ConfigError::NonUtf8Path)?;
    load_from(&cwd)
}

/// Like [`load`], starting the search at `start`.
pub fn load_from(start: &Utf8Path) -> Result<Option<(Config, Utf8PathBuf)>, ConfigError> {
    let Some(path) = start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
    else {
        return Ok(None);
    };

    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let config: Config =
        facet_styx::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    Ok(Some((config, path)))
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The working directory is not valid UTF-8
    NonUtf8Path(PathBuf),
    /// I/O error reading the file
    Io(String),
    /// Parse error in the Styx file
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NonUtf8Path(path) => {
                write!(f, "Working directory is not UTF-8: {}", path.display())
            }
            ConfigError::Io(e) => write!(f, "Failed to read {}: {}", CONFIG_FILE, e),
            ConfigError::Parse(e) => write!(f, "Failed to parse {}: {}", CONFIG_FILE, e),
        }
    }
}

impl std::error::Error for ConfigError {}

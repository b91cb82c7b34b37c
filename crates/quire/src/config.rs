//! Settings from `QUIRE_*` environment variables (or command-line flags
//! carrying the same names).

use std::path::PathBuf;
use std::time::Duration;

use sync_core::SessionConfig;
use sync_core::session::{DEFAULT_BOOTSTRAP_TIMEOUT, DEFAULT_DEBOUNCE};

pub const STORE_VAR: &str = "QUIRE_STORE";
pub const ROOT_VAR: &str = "QUIRE_ROOT";
pub const STATE_DIR_VAR: &str = "QUIRE_STATE_DIR";
pub const DEBOUNCE_VAR: &str = "QUIRE_DEBOUNCE_MS";
pub const FTS_VAR: &str = "QUIRE_FTS";

/// Which remote store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Markdown files under `root`.
    Dir,
    /// Volatile in-process store, mostly for trying things out.
    Memory,
}

/// Runtime configuration, usually loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreKind,
    /// Root of the note directory (only used by [`StoreKind::Dir`])
    pub root: Option<PathBuf>,
    /// Where the WAL and the index snapshot live
    pub state_dir: PathBuf,
    /// Quiet period before local edits are written
    pub debounce: Duration,
    /// Whether the full-text index is maintained
    pub fts: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `QUIRE_STORE`: `dir` (default) or `memory`
    /// - `QUIRE_ROOT`: note directory, required for `dir` (supports ~ for home directory)
    /// - `QUIRE_STATE_DIR`: defaults to `<root>/.quire`
    /// - `QUIRE_DEBOUNCE_MS`: defaults to 2000
    /// - `QUIRE_FTS`: `true`/`false`, defaults to `true`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let store = match lookup(STORE_VAR).as_deref().map(str::trim) {
            None | Some("") | Some("dir") => StoreKind::Dir,
            Some("memory") => StoreKind::Memory,
            Some(other) => return Err(ConfigError::UnknownStore(other.to_string())),
        };

        let root = lookup(ROOT_VAR).filter(|s| !s.trim().is_empty()).map(|s| expand_tilde(&s));
        if store == StoreKind::Dir && root.is_none() {
            return Err(ConfigError::MissingRoot);
        }

        let state_dir = match lookup(STATE_DIR_VAR).filter(|s| !s.trim().is_empty()) {
            Some(dir) => expand_tilde(&dir),
            None => default_state_dir(root.as_ref()),
        };

        let debounce = match lookup(DEBOUNCE_VAR) {
            Some(value) => {
                let millis = value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    var: DEBOUNCE_VAR,
                    value: value.clone(),
                })?;
                Duration::from_millis(millis)
            }
            None => DEFAULT_DEBOUNCE,
        };

        let fts = match lookup(FTS_VAR) {
            Some(value) => parse_flag(&value).ok_or(ConfigError::InvalidValue { var: FTS_VAR, value })?,
            None => true,
        };

        Ok(Self {
            store,
            root,
            state_dir,
            debounce,
            fts,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            debounce: self.debounce,
            bootstrap_timeout: DEFAULT_BOOTSTRAP_TIMEOUT,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.state_dir.join("wal.json")
    }

    pub fn index_path(&self) -> PathBuf {
        self.state_dir.join("index.bin")
    }
}

fn default_state_dir(root: Option<&PathBuf>) -> PathBuf {
    match root {
        Some(root) => root.join(".quire"),
        None => dirs::data_local_dir()
            .map(|dir| dir.join("quire"))
            .unwrap_or_else(|| PathBuf::from(".quire")),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("QUIRE_ROOT must be set when using the dir store")]
    MissingRoot,

    #[error("Unknown store kind {0:?} (expected \"dir\" or \"memory\")")]
    UnknownStore(String),

    #[error("Invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[(ROOT_VAR, "/notes")]).unwrap();
        assert_eq!(config.store, StoreKind::Dir);
        assert_eq!(config.root, Some(PathBuf::from("/notes")));
        assert_eq!(config.state_dir, PathBuf::from("/notes/.quire"));
        assert_eq!(config.debounce, Duration::from_millis(2000));
        assert!(config.fts);
        assert_eq!(config.wal_path(), PathBuf::from("/notes/.quire/wal.json"));
    }

    #[test]
    fn test_dir_store_requires_root() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingRoot)));
        assert!(matches!(load(&[(ROOT_VAR, "  ")]), Err(ConfigError::MissingRoot)));
    }

    #[test]
    fn test_memory_store_needs_no_root() {
        let config = load(&[(STORE_VAR, "memory"), (STATE_DIR_VAR, "/tmp/q")]).unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.root, None);
        assert_eq!(config.index_path(), PathBuf::from("/tmp/q/index.bin"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            (ROOT_VAR, "/notes"),
            (STATE_DIR_VAR, "/state"),
            (DEBOUNCE_VAR, "50"),
            (FTS_VAR, "off"),
        ])
        .unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/state"));
        assert_eq!(config.session_config().debounce, Duration::from_millis(50));
        assert!(!config.fts);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[(ROOT_VAR, "/notes"), (DEBOUNCE_VAR, "soon")]),
            Err(ConfigError::InvalidValue { var: DEBOUNCE_VAR, .. })
        ));
        assert!(matches!(
            load(&[(ROOT_VAR, "/notes"), (FTS_VAR, "maybe")]),
            Err(ConfigError::InvalidValue { var: FTS_VAR, .. })
        ));
        assert!(matches!(load(&[(STORE_VAR, "s3")]), Err(ConfigError::UnknownStore(_))));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/notes"), home.join("notes"));
        assert_eq!(expand_tilde("/abs"), PathBuf::from("/abs"));
    }
}

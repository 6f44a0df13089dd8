//! Configuration loading
//!
//! Every setting resolves in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or malformed TOML file never stops startup; it is logged and the
//! remaining tiers apply.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_CONFIG: &str = "QC_CONFIG";
pub const ENV_DATABASE: &str = "QC_DATABASE";
pub const ENV_MART_DATABASE: &str = "QC_MART_DATABASE";
pub const ENV_BIND_ADDRESS: &str = "QC_BIND_ADDRESS";
pub const ENV_RUN_ID: &str = "QC_RUN_ID";
pub const ENV_LOG_LEVEL: &str = "QC_LOG_LEVEL";

/// Default rows per upsert statement
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 1000;

/// Default upper bound for a single contribution query
pub const DEFAULT_CONTRIBUTION_QUERY_TIMEOUT_MS: u64 = 10_000;

const APP_DIR: &str = "quality-compass";
const DATABASE_FILE: &str = "quality_compass.db";

/// Contents of `config.toml`; every key optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub mart_database_path: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub log_level: Option<String>,
    pub run_id: Option<String>,
    pub hydrate_on_startup: Option<bool>,
    pub import_batch_size: Option<usize>,
    pub contribution_query_timeout_ms: Option<u64>,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
    }
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub mart_database_path: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub run_id: Option<String>,
    pub log_level: Option<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Application database (canonical signals table)
    pub database_path: PathBuf,
    /// Analytics database holding the marts; `None` means the application database
    pub mart_database_path: Option<PathBuf>,
    pub bind_address: String,
    pub log_level: String,
    /// Restrict mart reads to one pipeline run
    pub run_id: Option<String>,
    pub hydrate_on_startup: bool,
    pub import_batch_size: usize,
    pub contribution_query_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            mart_database_path: None,
            bind_address: "127.0.0.1:8000".to_string(),
            log_level: "info".to_string(),
            run_id: None,
            hydrate_on_startup: false,
            import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            contribution_query_timeout_ms: DEFAULT_CONTRIBUTION_QUERY_TIMEOUT_MS,
        }
    }
}

impl ServiceConfig {
    /// Resolve configuration from CLI, process environment, TOML file and defaults
    pub fn resolve(cli: &CliOverrides) -> Self {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let toml = match locate_config_file(cli.config_file.as_deref(), &env) {
            Some(path) => match TomlConfig::load(&path) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                    TomlConfig::default()
                }
            },
            None => TomlConfig::default(),
        };

        Self::resolve_from(cli, &env, toml)
    }

    /// Resolution with injected environment lookup and pre-loaded TOML
    pub fn resolve_from(
        cli: &CliOverrides,
        env: &dyn Fn(&str) -> Option<String>,
        toml: TomlConfig,
    ) -> Self {
        let defaults = Self::default();

        let database_path = cli
            .database_path
            .clone()
            .or_else(|| env(ENV_DATABASE).map(PathBuf::from))
            .or(toml.database_path)
            .unwrap_or(defaults.database_path);

        let mart_database_path = cli
            .mart_database_path
            .clone()
            .or_else(|| env(ENV_MART_DATABASE).map(PathBuf::from))
            .or(toml.mart_database_path);

        let bind_address = cli
            .bind_address
            .clone()
            .or_else(|| env(ENV_BIND_ADDRESS))
            .or(toml.bind_address)
            .unwrap_or(defaults.bind_address);

        let log_level = cli
            .log_level
            .clone()
            .or_else(|| env(ENV_LOG_LEVEL))
            .or(toml.log_level)
            .unwrap_or(defaults.log_level);

        let run_id = cli
            .run_id
            .clone()
            .or_else(|| env(ENV_RUN_ID))
            .or(toml.run_id);

        let import_batch_size = match toml.import_batch_size {
            Some(0) => {
                warn!("import_batch_size = 0 is invalid, using {}", DEFAULT_IMPORT_BATCH_SIZE);
                DEFAULT_IMPORT_BATCH_SIZE
            }
            Some(n) => n,
            None => defaults.import_batch_size,
        };

        Self {
            database_path,
            mart_database_path,
            bind_address,
            log_level,
            run_id,
            hydrate_on_startup: toml.hydrate_on_startup.unwrap_or(defaults.hydrate_on_startup),
            import_batch_size,
            contribution_query_timeout_ms: toml
                .contribution_query_timeout_ms
                .unwrap_or(defaults.contribution_query_timeout_ms),
        }
    }

    /// Database the marts are read from
    pub fn effective_mart_path(&self) -> &Path {
        self.mart_database_path.as_deref().unwrap_or(&self.database_path)
    }
}

/// Find the config file: explicit path, then `QC_CONFIG`, then platform locations
fn locate_config_file(
    cli_path: Option<&Path>,
    env: &dyn Fn(&str) -> Option<String>,
) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env(ENV_CONFIG) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR).join(DATABASE_FILE))
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_configured() {
        let config = ServiceConfig::resolve_from(&CliOverrides::default(), &env_from(&[]), TomlConfig::default());
        assert_eq!(config.bind_address, "127.0.0.1:8000");
        assert_eq!(config.import_batch_size, 1000);
        assert_eq!(config.contribution_query_timeout_ms, 10_000);
        assert!(config.run_id.is_none());
        assert!(!config.hydrate_on_startup);
        assert_eq!(config.effective_mart_path(), config.database_path.as_path());
    }

    #[test]
    fn test_cli_beats_env_beats_toml() {
        let toml = TomlConfig {
            database_path: Some(PathBuf::from("/toml/app.db")),
            run_id: Some("toml-run".into()),
            bind_address: Some("0.0.0.0:1".into()),
            ..Default::default()
        };
        let env = env_from(&[(ENV_DATABASE, "/env/app.db"), (ENV_RUN_ID, "env-run")]);
        let cli = CliOverrides {
            database_path: Some(PathBuf::from("/cli/app.db")),
            ..Default::default()
        };

        let config = ServiceConfig::resolve_from(&cli, &env, toml);

        assert_eq!(config.database_path, PathBuf::from("/cli/app.db"));
        assert_eq!(config.run_id.as_deref(), Some("env-run"));
        assert_eq!(config.bind_address, "0.0.0.0:1");
    }

    #[test]
    fn test_separate_mart_database() {
        let env = env_from(&[(ENV_MART_DATABASE, "/data/analytics.db")]);
        let config = ServiceConfig::resolve_from(&CliOverrides::default(), &env, TomlConfig::default());
        assert_eq!(config.effective_mart_path(), Path::new("/data/analytics.db"));
    }

    #[test]
    fn test_zero_batch_size_falls_back_to_default() {
        let toml = TomlConfig {
            import_batch_size: Some(0),
            ..Default::default()
        };
        let config = ServiceConfig::resolve_from(&CliOverrides::default(), &env_from(&[]), toml);
        assert_eq!(config.import_batch_size, DEFAULT_IMPORT_BATCH_SIZE);
    }

    #[test]
    fn test_toml_parsing() {
        let toml: TomlConfig = toml::from_str(
            r#"
            database_path = "/var/lib/qc/app.db"
            hydrate_on_startup = true
            import_batch_size = 500
            contribution_query_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(toml.database_path, Some(PathBuf::from("/var/lib/qc/app.db")));
        assert_eq!(toml.hydrate_on_startup, Some(true));
        assert_eq!(toml.import_batch_size, Some(500));
        assert_eq!(toml.contribution_query_timeout_ms, Some(2500));
    }

    #[test]
    #[serial_test::serial]
    fn test_resolve_reads_config_file_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "run_id = \"nightly-42\"\nimport_batch_size = 250\n").unwrap();

        std::env::set_var(ENV_CONFIG, &path);
        std::env::remove_var(ENV_RUN_ID);
        let config = ServiceConfig::resolve(&CliOverrides::default());
        std::env::remove_var(ENV_CONFIG);

        assert_eq!(config.run_id.as_deref(), Some("nightly-42"));
        assert_eq!(config.import_batch_size, 250);
    }

    #[test]
    #[serial_test::serial]
    fn test_unreadable_config_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "import_batch_size = \"lots\"").unwrap();

        std::env::set_var(ENV_CONFIG, &path);
        let config = ServiceConfig::resolve(&CliOverrides::default());
        std::env::remove_var(ENV_CONFIG);

        assert_eq!(config.import_batch_size, DEFAULT_IMPORT_BATCH_SIZE);
    }
}

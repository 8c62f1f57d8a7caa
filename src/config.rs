//! Configuration file support.
//!
//! ```toml
//! [database]
//! host = "localhost"
//! port = 5432
//! user = "postgres"
//! password = "secret"
//! name = "metrics"
//! max_connections = 10
//! acquire_timeout_secs = 30
//! reset_interval_minutes = 60
//!
//! [defaults]
//! since = "24h"
//! bucket = "10s"
//! retention = "7d"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::PoolConfig;
use crate::error::{DbError, DbResult};

/// File looked up in the working directory.
pub const FILE_NAME: &str = "pgts.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub defaults: Defaults,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub name: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Periodic pool reset, in minutes.
    pub reset_interval_minutes: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            name: "postgres".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            reset_interval_minutes: None,
        }
    }
}

/// Interval shorthands the CLI falls back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub since: String,
    pub bucket: String,
    pub retention: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            since: "24h".to_string(),
            bucket: "1m".to_string(),
            retention: "30d".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> DbResult<Self> {
        toml::from_str(content).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Candidate files in lookup order: `./pgts.toml`, then the user config dir.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("pgts").join("config.toml"));
        }
        paths
    }

    /// Load `explicit` if given (it must exist), else the first search path that
    /// exists, else defaults.
    pub fn load(explicit: Option<&Path>) -> DbResult<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }
        match Self::search_paths().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load_file(&path),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    fn load_file(path: &Path) -> DbResult<Self> {
        tracing::debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))
    }
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> DbResult<PoolConfig> {
        let mut config = PoolConfig::new(&self.host, self.port, &self.user, &self.name)
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs));
        if let Some(password) = &self.password {
            config = config.password(password);
        }
        if let Some(minutes) = self.reset_interval_minutes {
            let secs = minutes.checked_mul(60).ok_or_else(|| {
                DbError::Config(format!("reset_interval_minutes {} is too large", minutes))
            })?;
            config = config.reset_interval(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            [database]
            host = "db.internal"
            port = 6432
            user = "ingest"
            password = "pw"
            name = "metrics"
            max_connections = 4
            acquire_timeout_secs = 5
            reset_interval_minutes = 15

            [defaults]
            bucket = "10s"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.defaults.bucket, "10s");
        assert_eq!(config.defaults.since, "24h");

        let pool = config.database.pool_config().unwrap();
        assert_eq!(pool.port, 6432);
        assert_eq!(pool.max_connections, 4);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(5));
        assert_eq!(pool.reset_interval, Some(Duration::from_secs(900)));
        assert_eq!(pool.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            Config::from_toml("[database]\nport = \"high\""),
            Err(DbError::Config(_))
        ));
    }

    #[test]
    fn test_reset_interval_overflow() {
        let config = Config::from_toml("[database]\nreset_interval_minutes = 9223372036854775807")
            .unwrap();
        assert!(matches!(config.database.pool_config(), Err(DbError::Config(_))));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/pgts.toml"))).unwrap_err();
        assert!(matches!(err, DbError::Io(_)));
    }
}

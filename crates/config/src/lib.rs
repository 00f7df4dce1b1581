//! Notificator Configuration
//!
//! Configuration model for the collaboration backend: TOML file loading,
//! `NOTIFICATOR_`-prefixed environment overrides and defaults. Precedence is
//! resolved by the binary: CLI flags > environment > file > defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Default gRPC bind address.
pub const DEFAULT_GRPC_LISTEN: &str = ":50051";
/// Default HTTP (health/metrics) bind address.
pub const DEFAULT_HTTP_LISTEN: &str = ":8080";
/// Default embedded database file.
pub const DEFAULT_SQLITE_PATH: &str = "notificator.db";
/// Default session lifetime (7 days).
pub const DEFAULT_SESSION_TTL_HOURS: u64 = 168;
/// Default bcrypt cost parameter.
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Prefix recognized for environment overrides.
pub const ENV_PREFIX: &str = "NOTIFICATOR_";

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Persistence backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Sqlite,
    Postgres,
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::Sqlite => write!(f, "sqlite"),
            DatabaseType::Postgres => write!(f, "postgres"),
        }
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(DatabaseType::Sqlite),
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            _ => Err(format!("unknown database type: {}", s)),
        }
    }
}

/// TLS behavior for the networked backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SslMode::Disable => write!(f, "disable"),
            SslMode::Prefer => write!(f, "prefer"),
            SslMode::Require => write!(f, "require"),
        }
    }
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            _ => Err(format!("unknown ssl mode: {}", s)),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub backend: BackendSection,
    pub logging: LoggingSection,
}

/// Backend service configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSection {
    /// gRPC bind address; `:PORT` binds all interfaces.
    pub grpc_listen: String,
    /// HTTP health/metrics bind address.
    pub http_listen: String,
    pub database: DatabaseSection,
    pub auth: AuthSection,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            grpc_listen: DEFAULT_GRPC_LISTEN.to_string(),
            http_listen: DEFAULT_HTTP_LISTEN.to_string(),
            database: DatabaseSection::default(),
            auth: AuthSection::default(),
        }
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSection {
    #[serde(rename = "type")]
    pub db_type: DatabaseType,
    /// Embedded backend file path.
    pub sqlite_path: String,
    /// Networked backend connection parameters.
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            db_type: DatabaseType::Sqlite,
            sqlite_path: DEFAULT_SQLITE_PATH.to_string(),
            host: "localhost".to_string(),
            port: 5432,
            name: "notificator".to_string(),
            user: "notificator".to_string(),
            password: String::new(),
            ssl_mode: SslMode::Disable,
        }
    }
}

/// Identity and session settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    pub session_ttl_hours: u64,
    pub bcrypt_cost: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Filter directive, e.g. `info` or `notificator=debug`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Applies `NOTIFICATOR_`-prefixed overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        self.apply_env_vars(vars)
    }

    /// Applies overrides from an explicit variable list. Dotted config paths
    /// map to underscores: `backend.grpc_listen` ↔ `NOTIFICATOR_BACKEND_GRPC_LISTEN`.
    /// Unrecognized keys under the prefix are ignored.
    pub fn apply_env_vars<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            debug!(target: "config", key = %key, "applying environment override");
            match suffix {
                "BACKEND_GRPC_LISTEN" => self.backend.grpc_listen = value,
                "BACKEND_HTTP_LISTEN" => self.backend.http_listen = value,
                "BACKEND_DATABASE_TYPE" => {
                    self.backend.database.db_type =
                        value.parse().map_err(|_| ConfigError::InvalidValue {
                            key,
                            value: value.clone(),
                        })?;
                }
                "BACKEND_DATABASE_SQLITE_PATH" => self.backend.database.sqlite_path = value,
                "BACKEND_DATABASE_HOST" => self.backend.database.host = value,
                "BACKEND_DATABASE_PORT" => {
                    self.backend.database.port =
                        value.parse().map_err(|_| ConfigError::InvalidValue {
                            key,
                            value: value.clone(),
                        })?;
                }
                "BACKEND_DATABASE_NAME" => self.backend.database.name = value,
                "BACKEND_DATABASE_USER" => self.backend.database.user = value,
                "BACKEND_DATABASE_PASSWORD" => self.backend.database.password = value,
                "BACKEND_DATABASE_SSL_MODE" => {
                    self.backend.database.ssl_mode =
                        value.parse().map_err(|_| ConfigError::InvalidValue {
                            key,
                            value: value.clone(),
                        })?;
                }
                "BACKEND_AUTH_SESSION_TTL_HOURS" => {
                    self.backend.auth.session_ttl_hours =
                        value.parse().map_err(|_| ConfigError::InvalidValue {
                            key,
                            value: value.clone(),
                        })?;
                }
                "BACKEND_AUTH_BCRYPT_COST" => {
                    self.backend.auth.bcrypt_cost =
                        value.parse().map_err(|_| ConfigError::InvalidValue {
                            key,
                            value: value.clone(),
                        })?;
                }
                "LOGGING_LEVEL" => self.logging.level = value,
                "LOGGING_FORMAT" => self.logging.format = value,
                _ => {}
            }
        }
        Ok(())
    }
}

/// Parses a listen address, interpreting a bare `:PORT` as all interfaces.
pub fn parse_listen_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if value.starts_with(':') {
        format!("0.0.0.0{}", value)
    } else {
        value.to_string()
    };
    normalized
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: "listen address".to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_contract() {
        let config = AppConfig::default();
        assert_eq!(config.backend.grpc_listen, ":50051");
        assert_eq!(config.backend.http_listen, ":8080");
        assert_eq!(config.backend.database.db_type, DatabaseType::Sqlite);
        assert_eq!(config.backend.database.sqlite_path, "notificator.db");
        assert_eq!(config.backend.auth.session_ttl_hours, 168);
        assert_eq!(config.backend.auth.bcrypt_cost, 10);
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[backend]
grpc_listen = "127.0.0.1:6000"

[backend.database]
type = "postgres"
host = "db.internal"
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.backend.grpc_listen, "127.0.0.1:6000");
        assert_eq!(config.backend.http_listen, ":8080");
        assert_eq!(config.backend.database.db_type, DatabaseType::Postgres);
        assert_eq!(config.backend.database.host, "db.internal");
        assert_eq!(config.backend.database.port, 5432);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load(Path::new("/nonexistent/notificator.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn env_overrides_map_dotted_paths() {
        let mut config = AppConfig::default();
        config
            .apply_env_vars(vec![
                (
                    "NOTIFICATOR_BACKEND_GRPC_LISTEN".to_string(),
                    ":7001".to_string(),
                ),
                (
                    "NOTIFICATOR_BACKEND_DATABASE_TYPE".to_string(),
                    "postgres".to_string(),
                ),
                (
                    "NOTIFICATOR_BACKEND_DATABASE_PORT".to_string(),
                    "5433".to_string(),
                ),
                ("NOTIFICATOR_LOGGING_FORMAT".to_string(), "json".to_string()),
                ("UNRELATED".to_string(), "ignored".to_string()),
                (
                    "NOTIFICATOR_NO_SUCH_KEY".to_string(),
                    "ignored".to_string(),
                ),
            ])
            .unwrap();

        assert_eq!(config.backend.grpc_listen, ":7001");
        assert_eq!(config.backend.database.db_type, DatabaseType::Postgres);
        assert_eq!(config.backend.database.port, 5433);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_vars(vec![(
                "NOTIFICATOR_BACKEND_DATABASE_PORT".to_string(),
                "not-a-port".to_string(),
            )])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn listen_addr_normalizes_bare_port() {
        assert_eq!(
            parse_listen_addr(":50051").unwrap(),
            "0.0.0.0:50051".parse().unwrap()
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse().unwrap()
        );
        assert!(parse_listen_addr("nonsense").is_err());
    }
}

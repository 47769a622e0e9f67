//! Command-line interface parsing for readthru
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! an [`AppConfig`]: which query to run, where the document store lives, which
//! cache store to use, and how long cached results stay live.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::cache::{default_cache_dir, CacheError, CacheKey, CacheStore, FileCacheStore, Ttl};
use crate::logging::LogFormat;
use crate::queries::{average_weight_key, health_records_key};

/// Error types for turning CLI arguments into a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `--ttl 0` was given
    #[error("Invalid ttl: '{0}'. The ttl must be a positive number of seconds")]
    InvalidTtl(u64),

    /// The user id does not form a usable cache key
    #[error("Invalid user id: '{0}'")]
    InvalidUserId(String),

    /// No `--cache-dir` was given and no home directory is available
    #[error("No cache directory available; pass --cache-dir")]
    NoCacheDir,

    /// The cache store could not be opened
    #[error(transparent)]
    Store(#[from] CacheError),
}

/// readthru - serve health queries through a read-through cache
#[derive(Parser, Debug)]
#[command(name = "readthru")]
#[command(about = "Serve health queries through a read-through cache")]
#[command(version)]
pub struct Cli {
    /// JSON file holding the `users` and `health_records` collections
    #[arg(long, env = "READTHRU_DATA", value_name = "PATH")]
    pub data: PathBuf,

    /// Directory for the file-backed cache (defaults to the XDG cache directory)
    #[arg(long, env = "READTHRU_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Redis server to cache in, instead of the file-backed cache
    #[cfg(feature = "redis")]
    #[arg(long, env = "READTHRU_REDIS_URL", value_name = "URL", conflicts_with = "cache_dir")]
    pub redis_url: Option<String>,

    /// Override the TTL of newly cached results, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub ttl: Option<u64>,

    /// Default log level (trace, debug, info, warn, error); RUST_LOG refines it
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    pub log_level: String,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Queries the CLI can run
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Average weight per gender across all users
    AvgWeight,
    /// All health records of one user
    HealthRecords {
        /// Owner id to look records up by
        user_id: String,
    },
}

/// Where cached entries are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConnection {
    /// JSON files in a directory
    Directory(PathBuf),
    /// A Redis server URL
    #[cfg(feature = "redis")]
    Redis(String),
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Query to run
    pub command: Command,
    /// Key the query's result is cached under
    pub cache_key: CacheKey,
    /// TTL override; `None` keeps the per-query default
    pub ttl: Option<Ttl>,
    /// Cache store endpoint
    pub store: StoreConnection,
    /// Document store endpoint
    pub fetcher: PathBuf,
}

impl AppConfig {
    /// Creates an AppConfig from parsed CLI arguments.
    ///
    /// # Arguments
    /// * `cli` - The parsed CLI struct
    ///
    /// # Returns
    /// * `Ok(AppConfig)` with appropriate settings
    /// * `Err(ConfigError)` if the TTL or user id is invalid, or no cache location exists
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let ttl = cli
            .ttl
            .map(|secs| Ttl::from_secs(secs).map_err(|_| ConfigError::InvalidTtl(secs)))
            .transpose()?;

        let cache_key = match &cli.command {
            Command::AvgWeight => average_weight_key(),
            Command::HealthRecords { user_id } => health_records_key(user_id)
                .map_err(|_| ConfigError::InvalidUserId(user_id.clone()))?,
        };

        Ok(Self {
            command: cli.command.clone(),
            cache_key,
            ttl,
            store: store_connection(cli)?,
            fetcher: cli.data.clone(),
        })
    }

    /// Opens the configured cache store
    pub fn open_store(&self) -> Result<Arc<dyn CacheStore>, ConfigError> {
        match &self.store {
            StoreConnection::Directory(dir) => Ok(Arc::new(FileCacheStore::with_dir(dir.clone()))),
            #[cfg(feature = "redis")]
            StoreConnection::Redis(url) => Ok(Arc::new(crate::cache::RedisCacheStore::open(url)?)),
        }
    }
}

fn store_connection(cli: &Cli) -> Result<StoreConnection, ConfigError> {
    #[cfg(feature = "redis")]
    if let Some(url) = &cli.redis_url {
        return Ok(StoreConnection::Redis(url.clone()));
    }

    match &cli.cache_dir {
        Some(dir) => Ok(StoreConnection::Directory(dir.clone())),
        None => default_cache_dir()
            .map(StoreConnection::Directory)
            .ok_or(ConfigError::NoCacheDir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["readthru", "--data", "store.json", "--cache-dir", "/tmp/rt"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_cli_parse_avg_weight() {
        let cli = parse(&["avg-weight"]);
        assert_eq!(cli.command, Command::AvgWeight);
        assert_eq!(cli.data, PathBuf::from("store.json"));
        assert!(cli.ttl.is_none());
        assert_eq!(cli.log_level, "warn");
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn test_cli_parse_health_records() {
        let cli = parse(&["health-records", "u42"]);
        assert_eq!(
            cli.command,
            Command::HealthRecords {
                user_id: "u42".to_string()
            }
        );
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let result = Cli::try_parse_from(["readthru", "--data", "store.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_cli_avg_weight() {
        let cli = parse(&["--ttl", "120", "avg-weight"]);
        let config = AppConfig::from_cli(&cli).unwrap();

        assert_eq!(config.cache_key.as_str(), "averageWeightByGender");
        assert_eq!(config.ttl.map(|t| t.as_secs()), Some(120));
        assert_eq!(
            config.store,
            StoreConnection::Directory(PathBuf::from("/tmp/rt"))
        );
        assert_eq!(config.fetcher, PathBuf::from("store.json"));
    }

    #[test]
    fn test_config_from_cli_health_records_key() {
        let cli = parse(&["health-records", "u7"]);
        let config = AppConfig::from_cli(&cli).unwrap();

        assert_eq!(config.cache_key.as_str(), "health_records:u7");
        assert!(config.ttl.is_none());
    }

    #[test]
    fn test_config_from_cli_zero_ttl() {
        let cli = parse(&["--ttl", "0", "avg-weight"]);
        let err = AppConfig::from_cli(&cli).unwrap_err();

        assert!(matches!(err, ConfigError::InvalidTtl(0)));
        assert!(err.to_string().contains("Invalid ttl"));
    }

    #[test]
    fn test_config_from_cli_blank_user_id() {
        let cli = parse(&["health-records", " "]);
        let result = AppConfig::from_cli(&cli);

        assert!(matches!(result, Err(ConfigError::InvalidUserId(_))));
    }

    #[test]
    fn test_log_format_json() {
        let cli = parse(&["--log-format", "json", "avg-weight"]);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}

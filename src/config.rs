use crate::clienv;
use crate::daemon::platform::DISPATCHER_PLATFORM;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Two workers by default, so while one restarts after a crash clients can
/// reconnect to the other.
pub const DEFAULT_NUM_WORKERS: usize = 2;
/// Session secrets are kept in a per-worker redis list, not broadcast, so
/// only one worker can serve clients consistently.
pub const MAX_SUPPORTED_WORKERS: usize = 1;

const DEFAULT_FD_LIMIT: u64 = 4096;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PORT: u16 = 10550;
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_EXAMPLES_SECRET: &str = "1234567890";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker processes (defaults to 2, currently clamped to 1)
    pub num_workers: Option<usize>,
    /// Log filter used when RUST_LOG is not set
    pub log_level: String,
    /// Target for the open file descriptor limit of each worker
    pub fd_limit: u64,
    /// How long the supervisor waits for workers after broadcasting shutdown
    pub shutdown_timeout_secs: u64,
    /// Platforms enabled on this instance
    pub platforms: Vec<String>,
    pub host: HostConfig,
    pub redis: RedisConfig,
    pub public: Option<PublicConfig>,
    pub examples: ExamplesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub enable_tls: bool,
    pub bind: String,
    pub port: u16,
    /// Platforms served by workers on this host (defaults to `platforms`)
    pub my_platforms: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub probe_timeout_secs: u64,
}

/// Public address clients should use when the daemon sits behind a proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicConfig {
    pub domain: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamplesConfig {
    pub enable: bool,
    pub secret: String,
    pub location: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: None,
            log_level: "info".to_string(),
            fd_limit: DEFAULT_FD_LIMIT,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            platforms: vec![DISPATCHER_PLATFORM.to_string(), "dummy".to_string()],
            host: HostConfig::default(),
            redis: RedisConfig::default(),
            public: None,
            examples: ExamplesConfig::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            enable_tls: false,
            bind: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            my_platforms: None,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_REDIS_PORT,
            password: None,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
        }
    }
}

impl RedisConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for ExamplesConfig {
    fn default() -> Self {
        Self {
            enable: true,
            secret: DEFAULT_EXAMPLES_SECRET.to_string(),
            location: PathBuf::from("./demos"),
        }
    }
}

impl Config {
    /// Load config from an explicit path, $SOCKETHUB_CONFIG, or the default
    /// location, then apply environment overrides.
    ///
    /// Only the default location may be missing; it yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(clienv::config_path_override);

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                Self::from_file(&path)?
            }
            None => {
                let path = clienv::default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::trace!("Config file does not exist, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_overrides(clienv::env_opt);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::trace!(path = %path.display(), "Loading config");
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production). Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(clienv::SOCKETHUB_REDIS_HOST) {
            self.redis.host = host;
        }
        if let Some(port) = lookup(clienv::SOCKETHUB_REDIS_PORT) {
            match port.parse() {
                Ok(port) => self.redis.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid {}", clienv::SOCKETHUB_REDIS_PORT),
            }
        }
        if let Some(password) = lookup(clienv::SOCKETHUB_REDIS_PASSWORD) {
            self.redis.password = Some(password);
        }
        if let Some(workers) = lookup(clienv::SOCKETHUB_NUM_WORKERS) {
            match workers.parse() {
                Ok(n) => self.num_workers = Some(n),
                Err(_) => {
                    warn!(value = %workers, "Ignoring invalid {}", clienv::SOCKETHUB_NUM_WORKERS)
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == Some(0) {
            return Err(ConfigError::Invalid("num_workers must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for platform in self.my_platforms() {
            if platform.trim().is_empty() {
                return Err(ConfigError::Invalid("empty platform name".into()));
            }
            if !seen.insert(platform.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "platform '{}' is listed more than once",
                    platform
                )));
            }
        }
        Ok(())
    }

    /// Platforms assigned to workers on this host, in configured order.
    pub fn my_platforms(&self) -> &[String] {
        self.host.my_platforms.as_deref().unwrap_or(&self.platforms)
    }

    pub fn desired_worker_count(&self) -> usize {
        self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS)
    }

    /// Worker count actually spawned. Lifting the clamp requires broadcasting
    /// session secrets to every worker through redis.
    pub fn effective_worker_count(&self) -> usize {
        let desired = self.desired_worker_count();
        if desired > MAX_SUPPORTED_WORKERS {
            warn!(
                desired,
                effective = MAX_SUPPORTED_WORKERS,
                "Clamping worker count: session secrets are not shared across workers"
            );
        }
        desired.min(MAX_SUPPORTED_WORKERS)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.desired_worker_count(), 2);
        assert_eq!(config.effective_worker_count(), 1);
        assert_eq!(config.fd_limit, 4096);
        assert_eq!(config.host.port, 10550);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.my_platforms(), &["dispatcher", "dummy"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            num_workers = 3
            platforms = ["dispatcher", "dummy", "xmpp"]

            [host]
            port = 8080
            my_platforms = ["dummy"]

            [redis]
            host = "redis.internal"
            password = "hunter2"
            "#,
        )
        .unwrap();

        assert_eq!(config.num_workers, Some(3));
        assert_eq!(config.host.port, 8080);
        assert_eq!(config.host.bind, "127.0.0.1");
        assert_eq!(config.my_platforms(), &["dummy"]);
        assert_eq!(config.redis.host, "redis.internal");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.password.as_deref(), Some("hunter2"));
        assert_eq!(config.effective_worker_count(), 1);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "shutdown_timeout_secs = 3\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "num_workers = \"many\"").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (clienv::SOCKETHUB_REDIS_HOST, "10.0.0.5"),
            (clienv::SOCKETHUB_REDIS_PORT, "not-a-port"),
            (clienv::SOCKETHUB_NUM_WORKERS, "4"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.redis.host, "10.0.0.5");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.num_workers, Some(4));
        assert!(config.redis.password.is_none());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_zero_workers() {
        let mut config = Config::default();
        config.platforms = vec!["dummy".into(), "dummy".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.num_workers = Some(0);
        assert!(config.validate().is_err());
    }
}

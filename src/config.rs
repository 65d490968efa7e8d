use serde_derive::Deserialize;
use std::io::Read;
use std::str::FromStr;
use std::time::Duration;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use thiserror::*;
use tracing::warn;

use crate::datastore::DEFAULT_MAX_TASKS;

pub const CONFIG_PATH_ENV: &str = "TASKSTORE_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error {0} when reading config")]
    IoError(#[from] std::io::Error),
    #[error("cannot open config file '{0}' : {1}")]
    OpeningError(PathBuf, std::io::Error),
    #[error("UTF8 format error when reading config")]
    Utf8Error,
    #[error("format error {0} when reading config")]
    FormatError(#[from] serde_yaml::Error),
}

/// Durations are written the humantime way: `30s`, `5m`, `1h 30m`.
mod duration_str {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Listen {
    pub host: String,
    pub port: u16,
    #[serde(deserialize_with = "duration_str::deserialize")]
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

impl Default for Listen {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            timeout: Duration::from_secs(60),
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Values `<= 0` fall back to the store default.
    pub max_tasks: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS as i64,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub per_ip: u32,
    pub per_api_key: u32,
    #[serde(deserialize_with = "duration_str::deserialize")]
    pub window: Duration,
    #[serde(deserialize_with = "duration_str::deserialize")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_ip: 100,
            per_api_key: 1000,
            window: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "debug" => Ok(Environment::Development),
            "production" | "release" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!("unknown environment {}", other)),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: Listen,
    pub storage: StorageConfig,
    pub cors: CorsConfig,
    pub rate_limit: RateLimitConfig,
    pub environment: Environment,
    #[serde(deserialize_with = "duration_str::deserialize")]
    pub shutdown_timeout: Duration,
    pub log: Option<crate::log::Log>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: Listen::default(),
            storage: StorageConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            environment: Environment::Production,
            shutdown_timeout: Duration::from_secs(30),
            log: None,
        }
    }
}

impl Config {
    pub fn from_str(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let p = path.as_ref();
        let mut file = File::open(p).map_err(|e| ConfigError::OpeningError(p.to_owned(), e))?;
        let mut contents = vec![];
        file.read_to_end(&mut contents)?;
        let contents = String::from_utf8(contents).map_err(|_| ConfigError::Utf8Error)?;
        let config = Config::from_str(&contents)?;
        Ok(config)
    }

    /// Reads the file named by `TASKSTORE_CONFIG` when set. Environment
    /// overrides are applied separately with [`Config::apply_env`], once
    /// logging is up.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Config::from_file(path),
            Err(_) => Ok(Config::default()),
        }
    }

    /// Override settings from `lookup`. Invalid values are logged and
    /// skipped; their keys are returned.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvOverrides {
            lookup,
            rejected: Vec::new(),
        };

        if let Some(host) = env.raw("HOST") {
            self.listen.host = host;
        }
        if let Some(port) = env.parse("PORT") {
            self.listen.port = port;
        }
        if let Some(max_tasks) = env.parse("MAX_TASKS") {
            self.storage.max_tasks = max_tasks;
        }
        if let Some(environment) = env.parse("ENVIRONMENT") {
            self.environment = environment;
        }
        if let Some(timeout) = env.duration("SHUTDOWN_TIMEOUT", Duration::from_secs(1)) {
            self.shutdown_timeout = timeout;
        }
        if let Some(timeout) = env.duration("REQUEST_TIMEOUT", Duration::from_secs(1)) {
            self.listen.timeout = timeout;
        }
        if let Some(origins) = env.raw("ALLOWED_ORIGINS") {
            self.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(enabled) = env.parse("RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = enabled;
        }
        if let Some(per_ip) = env.parse("RATE_LIMIT_PER_IP") {
            self.rate_limit.per_ip = per_ip;
        }
        if let Some(per_api_key) = env.parse("RATE_LIMIT_PER_API_KEY") {
            self.rate_limit.per_api_key = per_api_key;
        }
        // bare numbers are minutes here
        if let Some(interval) =
            env.duration("RATE_LIMIT_CLEANUP_TIME", Duration::from_secs(60))
        {
            self.rate_limit.cleanup_interval = interval;
        }

        env.rejected
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.listen.host, self.listen.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

struct EnvOverrides<F> {
    lookup: F,
    rejected: Vec<&'static str>,
}

impl<F> EnvOverrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Set and not blank.
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&mut self, key: &'static str) -> Option<T> {
        let raw = self.raw(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key = key, value = raw.as_str(), "invalid value, using default");
                self.rejected.push(key);
                None
            }
        }
    }

    /// Accepts a humantime string or a bare integer counted in `bare_unit`.
    fn duration(&mut self, key: &'static str, bare_unit: Duration) -> Option<Duration> {
        let raw = self.raw(key)?;
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<u32>() {
            return Some(bare_unit * n);
        }
        match humantime::parse_duration(raw) {
            Ok(duration) => Some(duration),
            Err(_) => {
                warn!(key = key, value = raw, "invalid duration, using default");
                self.rejected.push(key);
                None
            }
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub api: ApiConfig,
    /// Reconnect policy of the payment push channel
    #[serde(default = "BackoffConfig::push")]
    pub push: BackoffConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Sent as `actorId` on intent creation
    pub actor_id: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 15_000,
            actor_id: "anonymous".to_string(),
        }
    }
}

/// Exponential backoff: `base_ms * factor^(n-1)`, capped at `cap_ms`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub factor: u32,
    pub cap_ms: u64,
    /// Retries before giving up; omit to retry forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl BackoffConfig {
    pub fn push() -> Self {
        Self {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 30_000,
            max_attempts: Some(5),
        }
    }

    pub fn notification() -> Self {
        Self {
            max_attempts: None,
            ..Self::push()
        }
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.base_ms == 0 || self.factor == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: base_ms and factor must be positive",
                section
            )));
        }
        if self.cap_ms < self.base_ms {
            return Err(ConfigError::Invalid(format!(
                "{}: cap_ms ({}) below base_ms ({})",
                section, self.cap_ms, self.base_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// Overall deadline before reporting `Expired`
    pub timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            timeout_ms: 30_000,
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Directory for snapshot files; in-memory only when unset
    #[serde(default)]
    pub dir: Option<String>,
    pub ttl_seconds: u64,
    pub revalidate_timeout_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: Some("./data/snapshots".to_string()),
            ttl_seconds: 900,
            revalidate_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationConfig {
    pub url: String,
    #[serde(default = "BackoffConfig::notification")]
    pub backoff: BackoffConfig,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    crate::notification::cache::DEFAULT_CACHE_CAPACITY
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            backoff: BackoffConfig::notification(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.push.validate("push")?;
        self.notification.backoff.validate("notification.backoff")?;
        if self.poll.interval_ms == 0 {
            return Err(ConfigError::Invalid("poll.interval_ms must be positive".into()));
        }
        if self.poll.timeout_ms < self.poll.interval_ms {
            return Err(ConfigError::Invalid(format!(
                "poll.timeout_ms ({}) below poll.interval_ms ({})",
                self.poll.timeout_ms, self.poll.interval_ms
            )));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api.base_url is empty".into()));
        }
        Ok(())
    }
}

use std::{
    env, fs,
    num::{NonZeroU32, NonZeroUsize},
    path::Path,
    time::Duration,
};

use serde::Deserialize;

use crate::error::{EngineError, Result};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_ENDPOINT: &str = "/execute_function";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_WORKERS: usize = 32;

/// Environment variable holding the path of an optional JSON config file.
pub const CONFIG_PATH_VAR: &str = "RAM_SHARING_CONFIG";

/// Knobs for a single engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Port the peers' executor listens on, used when an address carries none.
    pub port: u16,
    /// Path of the job endpoint on every peer.
    pub endpoint: String,
    /// Total attempts per device, the first one included.
    pub max_retries: NonZeroU32,
    /// Timeout for every `/ram` probe.
    pub probe_timeout: Duration,
    /// Timeout for every job submission.
    pub dispatch_timeout: Duration,
    /// Delay before the second attempt, doubled after every failure.
    pub retry_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_retry_delay: Duration,
    /// Upper bound for concurrent dispatch tasks.
    pub max_workers: NonZeroUsize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            // SAFETY: Both constants are non zero.
            max_retries: NonZeroU32::new(DEFAULT_MAX_RETRIES).unwrap(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            max_workers: NonZeroUsize::new(DEFAULT_MAX_WORKERS).unwrap(),
        }
    }
}

/// On disk representation, every field is optional and falls back to the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    port: Option<u16>,
    endpoint: Option<String>,
    max_retries: Option<NonZeroU32>,
    probe_timeout_ms: Option<u64>,
    dispatch_timeout_ms: Option<u64>,
    retry_delay_ms: Option<u64>,
    max_retry_delay_ms: Option<u64>,
    max_workers: Option<NonZeroUsize>,
}

impl EngineConfig {
    /// Loads the configuration from the defaults, the file pointed by
    /// `RAM_SHARING_CONFIG` (if any) and finally the `RAM_SHARING_*` variables.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the file or any variable cannot be parsed,
    /// or if the resulting configuration fails validation.
    pub fn load() -> Result<Self> {
        let config = match env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        let config = config.with_env_from(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file on top of the defaults.
    ///
    /// # Arguments
    /// * `path` - The config file path.
    ///
    /// # Returns
    /// The parsed configuration or an `InvalidConfig` error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
        })?;

        Self::from_json_str(&content)
    }

    /// Parses a JSON config document on top of the defaults.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(content)
            .map_err(|e| EngineError::InvalidConfig(format!("invalid JSON: {e}")))?;

        let mut config = Self::default();
        let ms = Duration::from_millis;

        if let Some(port) = file.port {
            config.port = port;
        }
        if let Some(endpoint) = file.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(max_retries) = file.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(timeout) = file.probe_timeout_ms {
            config.probe_timeout = ms(timeout);
        }
        if let Some(timeout) = file.dispatch_timeout_ms {
            config.dispatch_timeout = ms(timeout);
        }
        if let Some(delay) = file.retry_delay_ms {
            config.retry_delay = ms(delay);
        }
        if let Some(delay) = file.max_retry_delay_ms {
            config.max_retry_delay = ms(delay);
        }
        if let Some(max_workers) = file.max_workers {
            config.max_workers = max_workers;
        }

        Ok(config)
    }

    /// Applies `RAM_SHARING_*` overrides read through `lookup`.
    ///
    /// # Arguments
    /// * `lookup` - Resolves a variable name to its value, if set.
    ///
    /// # Returns
    /// The overridden configuration or an `InvalidConfig` error naming the bad variable.
    pub fn with_env_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| EngineError::InvalidConfig(format!("{key} has an invalid value: {raw}")))
        }

        if let Some(raw) = lookup("RAM_SHARING_PORT") {
            self.port = parse("RAM_SHARING_PORT", raw)?;
        }
        if let Some(raw) = lookup("RAM_SHARING_ENDPOINT") {
            self.endpoint = raw;
        }
        if let Some(raw) = lookup("RAM_SHARING_MAX_RETRIES") {
            self.max_retries = parse("RAM_SHARING_MAX_RETRIES", raw)?;
        }
        if let Some(raw) = lookup("RAM_SHARING_PROBE_TIMEOUT_MS") {
            self.probe_timeout = Duration::from_millis(parse("RAM_SHARING_PROBE_TIMEOUT_MS", raw)?);
        }
        if let Some(raw) = lookup("RAM_SHARING_DISPATCH_TIMEOUT_MS") {
            self.dispatch_timeout =
                Duration::from_millis(parse("RAM_SHARING_DISPATCH_TIMEOUT_MS", raw)?);
        }
        if let Some(raw) = lookup("RAM_SHARING_MAX_WORKERS") {
            self.max_workers = parse("RAM_SHARING_MAX_WORKERS", raw)?;
        }

        Ok(self)
    }

    /// Checks the invariants the engine relies on.
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with('/') {
            return Err(EngineError::InvalidConfig(format!(
                "endpoint must start with '/', got '{}'",
                self.endpoint
            )));
        }
        if self.probe_timeout.is_zero() || self.dispatch_timeout.is_zero() {
            return Err(EngineError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        if self.retry_delay > self.max_retry_delay {
            return Err(EngineError::InvalidConfig(
                "retry delay cannot exceed the maximum retry delay".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.endpoint, "/execute_function");
        assert_eq!(config.max_retries.get(), 3);
    }

    #[test]
    fn file_overrides_only_given_fields() {
        let config =
            EngineConfig::from_json_str(r#"{ "port": 6000, "dispatch_timeout_ms": 1500 }"#)
                .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.dispatch_timeout, Duration::from_millis(1500));
        assert_eq!(config.probe_timeout, DEFAULT_PROBE_TIMEOUT);
    }

    #[test]
    fn file_rejects_unknown_and_zero_fields() {
        assert!(EngineConfig::from_json_str(r#"{ "prot": 1 }"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{ "max_retries": 0 }"#).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("RAM_SHARING_PORT", "7000"),
            ("RAM_SHARING_MAX_RETRIES", "5"),
            ("RAM_SHARING_PROBE_TIMEOUT_MS", "100"),
        ]
        .into_iter()
        .collect();

        let config = EngineConfig::default()
            .with_env_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.max_retries.get(), 5);
        assert_eq!(config.probe_timeout, Duration::from_millis(100));
    }

    #[test]
    fn env_rejects_garbage() {
        let res = EngineConfig::default().with_env_from(|key| {
            (key == "RAM_SHARING_MAX_WORKERS").then(|| "zero".to_string())
        });

        assert!(matches!(res, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_bad_endpoint_and_timeouts() {
        let config = EngineConfig {
            endpoint: "execute".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            probe_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

//! Proxy configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional JSON file named by `PROXY_CONFIG`, individual environment
//! variables, and finally a port given as the first command-line argument.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::{CacheLimits, MAX_CACHE_SIZE, MAX_OBJECT_SIZE};

/// The `User-Agent` every forwarded request carries.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:3.10.0) Gecko/20191101 Firefox/63.0.1";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("max_object_size ({object}) exceeds max_cache_size ({cache})")]
    ObjectLargerThanCache { object: usize, cache: usize },

    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
}

/// Runtime settings for the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Interface to listen on
    pub listen_addr: String,
    /// TCP port to listen on
    pub port: u16,
    /// Total bytes the cache may hold
    pub max_cache_size: usize,
    /// Largest body that will be cached
    pub max_object_size: usize,
    /// Bytes read from an origin per relay step
    pub chunk_size: usize,
    /// `User-Agent` sent upstream
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            port: 8080,
            max_cache_size: MAX_CACHE_SIZE,
            max_object_size: MAX_OBJECT_SIZE,
            chunk_size: 8192,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment and arguments.
    ///
    /// `args` are the command-line arguments *after* the program name.
    ///
    /// # Errors
    ///
    /// Fails if the config file cannot be read or parsed, if any variable or
    /// the port argument does not parse, or if the result is invalid.
    pub fn load(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        Self::from_sources(|key| std::env::var(key).ok(), args)
    }

    /// Like [`load`](Self::load), with the environment supplied by `lookup`.
    pub fn from_sources<F>(
        lookup: F,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("PROXY_CONFIG") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(port) = parse_var(&lookup, "PROXY_PORT")? {
            config.port = port;
        }
        if let Some(size) = parse_var(&lookup, "PROXY_MAX_CACHE_SIZE")? {
            config.max_cache_size = size;
        }
        if let Some(size) = parse_var(&lookup, "PROXY_MAX_OBJECT_SIZE")? {
            config.max_object_size = size;
        }
        if let Some(size) = parse_var(&lookup, "PROXY_CHUNK_SIZE")? {
            config.chunk_size = size;
        }

        if let Some(arg) = args.into_iter().next() {
            config.port = arg.parse().map_err(|_| ConfigError::InvalidValue {
                key: "port argument".to_owned(),
                value: arg.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_object_size > self.max_cache_size {
            return Err(ConfigError::ObjectLargerThanCache {
                object: self.max_object_size,
                cache: self.max_cache_size,
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(())
    }

    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.port)
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_cache_size: self.max_cache_size,
            max_object_size: self.max_object_size,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_owned(),
                value,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_cache_size, 1_048_576);
        assert_eq!(config.max_object_size, 102_400);
        assert_eq!(config.chunk_size, 8192);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn no_sources_gives_defaults() {
        let config = Config::from_sources(env(&[]), Vec::new()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn env_overrides_defaults_and_arg_overrides_env() {
        let config = Config::from_sources(
            env(&[("PROXY_PORT", "9000"), ("PROXY_MAX_OBJECT_SIZE", "2048")]),
            vec!["15213".to_owned()],
        )
        .unwrap();
        assert_eq!(config.port, 15213);
        assert_eq!(config.max_object_size, 2048);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let err = Config::from_sources(env(&[("PROXY_CHUNK_SIZE", "lots")]), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PROXY_CHUNK_SIZE"));
    }

    #[test]
    fn bad_port_argument() {
        let err = Config::from_sources(env(&[]), vec!["http".to_owned()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = Config::from_json(r#"{ "port": 3128, "max_cache_size": 4096, "max_object_size": 1024 }"#)
            .unwrap();
        assert_eq!(config.port, 3128);
        assert_eq!(config.cache_limits().max_cache_size, 4096);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn json_rejects_unknown_fields() {
        assert!(matches!(
            Config::from_json(r#"{ "ttl": 30 }"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn missing_file() {
        let err = Config::from_sources(
            env(&[("PROXY_CONFIG", "/nonexistent/cacheproxy.json")]),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn object_cap_above_cache_cap_is_invalid() {
        let err = Config::from_sources(env(&[("PROXY_MAX_CACHE_SIZE", "1000")]), Vec::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ObjectLargerThanCache { .. }));
    }
}

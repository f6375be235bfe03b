//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.
//! Only the binary reads the environment; the pipeline components take the
//! option structs assembled here.

use crate::review::ReviewOptions;
use crate::simulation::SandboxOptions;
use crate::sql::ValidatorOptions;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Options handed to the pipeline components
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub validator: ValidatorOptions,
    pub sandbox: SandboxOptions,
    pub review: ReviewOptions,
}

/// Complete application settings
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub pipeline: PipelineConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let server = ServerConfig {
            host: parse_var(&lookup, "HOST")?.unwrap_or(defaults.server.host),
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.server.port),
        };

        let cors = CorsConfig {
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors.allowed_origins),
        };

        let mut validator = defaults.pipeline.validator;
        if let Some(max) = parse_var(&lookup, "MAX_QUERY_LENGTH")? {
            validator.max_query_length = max;
        }
        if let Some(allow) = parse_var::<bool, _>(&lookup, "ALLOW_TRUNCATE")? {
            validator.allow_truncate = allow;
        }

        let mut sandbox = defaults.pipeline.sandbox;
        if let Some(secs) = parse_var(&lookup, "SANDBOX_TTL_SECS")? {
            sandbox.ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SANDBOX_CLEANUP_DELAY_MS")? {
            sandbox.cleanup_delay = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(max) = parse_var(&lookup, "SANDBOX_MAX")? {
            sandbox.max_sandboxes = max;
        }
        sandbox.validator = validator.clone();

        let mut review = defaults.pipeline.review;
        if let Some(secs) = parse_var(&lookup, "REVIEW_TTL_SECS")? {
            review.ttl = Duration::from_secs(secs);
        }
        if let Some(threshold) = parse_var::<u8, _>(&lookup, "AUTO_APPROVE_THRESHOLD")? {
            if threshold > 100 {
                return Err(ConfigError::InvalidValue(format!(
                    "AUTO_APPROVE_THRESHOLD must be 0-100, got {}",
                    threshold
                )));
            }
            review.auto_approve_threshold = threshold;
        }

        Ok(Self {
            server,
            cors,
            pipeline: PipelineConfig {
                validator,
                sandbox,
                review,
            },
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{}={:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.pipeline.validator.max_query_length, 1_000_000);
        assert_eq!(settings.pipeline.sandbox.cleanup_delay, Some(Duration::from_secs(5)));
        assert_eq!(settings.pipeline.review.auto_approve_threshold, 85);
        assert_eq!(settings.pipeline.review.ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("ALLOWED_ORIGINS", "https://a.dev, https://b.dev"),
            ("ALLOW_TRUNCATE", "true"),
            ("SANDBOX_TTL_SECS", "60"),
            ("SANDBOX_CLEANUP_DELAY_MS", "0"),
            ("SANDBOX_MAX", "3"),
            ("AUTO_APPROVE_THRESHOLD", "95"),
        ]))
        .unwrap();

        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.cors.allowed_origins, vec!["https://a.dev", "https://b.dev"]);
        assert!(settings.pipeline.validator.allow_truncate);
        assert!(settings.pipeline.sandbox.validator.allow_truncate);
        assert_eq!(settings.pipeline.sandbox.ttl, Duration::from_secs(60));
        assert_eq!(settings.pipeline.sandbox.cleanup_delay, None);
        assert_eq!(settings.pipeline.sandbox.max_sandboxes, 3);
        assert_eq!(settings.pipeline.review.auto_approve_threshold, 95);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Settings::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = Settings::from_lookup(lookup(&[("AUTO_APPROVE_THRESHOLD", "101")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}

// ABOUTME: Environment-driven configuration for the sandbox orchestration service
// ABOUTME: Reads provider credentials, forwarded variables, worker port, timeouts and bundle paths

use crate::health::HealthPolicy;
use crate::providers::daytona::DEFAULT_API_URL;
use sandrelay_config::constants;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_FORWARD_ENV: &str = "OPENAI_API_KEY,EXA_API_KEY";
pub const DEFAULT_WORKER_PORT: u16 = 3213;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub api_key: String,
    pub api_url: String,
    /// Values forwarded opaquely into newly created sandboxes
    pub forward_env: HashMap<String, String>,
    pub worker_port: u16,
    pub start_timeout: Duration,
    pub health: HealthPolicy,
    pub stream_bundle_path: Option<PathBuf>,
    pub oneshot_bundle_path: Option<PathBuf>,
}

impl SandboxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_key = var(constants::DAYTONA_API_KEY)
            .ok_or(ConfigError::Missing(constants::DAYTONA_API_KEY))?;
        let api_url =
            var(constants::DAYTONA_BASE_URL).unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let forward_env = var(constants::SANDBOX_FORWARD_ENV)
            .unwrap_or_else(|| DEFAULT_FORWARD_ENV.to_string())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| lookup(name).map(|value| (name.to_string(), value)))
            .collect();

        let worker_port: u16 = parse_or(&var, constants::WORKER_PORT, DEFAULT_WORKER_PORT)?;
        if worker_port == 0 {
            return Err(ConfigError::Invalid {
                name: constants::WORKER_PORT,
                value: "0".to_string(),
                reason: "port must be between 1 and 65535".to_string(),
            });
        }

        let start_timeout_secs: u64 =
            parse_or(&var, constants::SANDBOX_START_TIMEOUT_SECS, 60)?;

        let defaults = HealthPolicy::default();
        let health = HealthPolicy {
            max_attempts: parse_or(
                &var,
                constants::HEALTH_CHECK_MAX_ATTEMPTS,
                defaults.max_attempts,
            )?,
            base_delay: Duration::from_millis(parse_or(
                &var,
                constants::HEALTH_CHECK_BASE_DELAY_MS,
                defaults.base_delay.as_millis() as u64,
            )?),
            ..defaults
        };
        if health.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: constants::HEALTH_CHECK_MAX_ATTEMPTS,
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        Ok(Self {
            api_key,
            api_url,
            forward_env,
            worker_port,
            start_timeout: Duration::from_secs(start_timeout_secs),
            health,
            stream_bundle_path: var(constants::STREAM_BUNDLE_PATH).map(PathBuf::from),
            oneshot_bundle_path: var(constants::ONESHOT_BUNDLE_PATH).map(PathBuf::from),
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

// ABOUTME: Server configuration loaded from environment variables
// ABOUTME: Listening port and bundler location for the sandrelay binary

use sandrelay_config::constants;
use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 4001;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// esbuild binary used when bundles are built on startup
    pub esbuild_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup(constants::PORT) {
            Some(port) => port.trim().parse::<u16>()?,
            None => DEFAULT_PORT,
        };

        // Validate port is in valid range
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let esbuild_path = lookup(constants::ESBUILD_PATH)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("esbuild"));

        Ok(ServerConfig { port, esbuild_path })
    }
}

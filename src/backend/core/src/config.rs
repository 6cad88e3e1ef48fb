//! Configuration management.
//!
//! Values come from `AEGIS__`-prefixed environment variables, optionally
//! layered over a file:
//!
//! ```text
//! AEGIS__DATABASE__URL=postgres://localhost/aegis
//! AEGIS__PAR__LIFETIME=90s
//! AEGIS__PAR__CACHE_CAPACITY=0
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::cache::ParCacheConfig;
use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,

    #[serde(default)]
    pub par: ParConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

/// Pushed authorization request settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ParConfig {
    /// How long a pushed request stays valid
    #[serde(default = "default_par_lifetime", with = "humantime_serde")]
    pub lifetime: Duration,

    /// Memory tier capacity; 0 disables it
    #[serde(default = "default_par_cache_capacity")]
    pub cache_capacity: u16,

    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub store_timeout: Duration,
}

impl Default for ParConfig {
    fn default() -> Self {
        Self {
            lifetime: default_par_lifetime(),
            cache_capacity: default_par_cache_capacity(),
            store_timeout: default_store_timeout(),
        }
    }
}

impl ParConfig {
    pub fn cache_config(&self) -> ParCacheConfig {
        ParCacheConfig::default()
            .with_capacity(self.cache_capacity)
            .with_store_timeout(self.store_timeout)
    }
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_par_lifetime() -> Duration { Duration::from_secs(60) }
fn default_par_cache_capacity() -> u16 { 1000 }
fn default_store_timeout() -> Duration { Duration::from_secs(5) }

const ENV_PREFIX: &str = "AEGIS";

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from a file, with the environment taking precedence.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

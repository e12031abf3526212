//! Relay configuration
//!
//! Configuration is a TOML document with a top-level `[[http]]` list; each
//! entry describes one relay listener with its own ring and backend maps.
//! Shard maps are nested tables: `[[http.output.<shard>]]` lists the
//! redundant backends of a shard, `[[http.former.<shard>]]` the
//! pre-resharding layout consulted by queries during the migration window.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Per-request timeout towards a backend when none is configured
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Health-probe period when none is configured
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);
/// Cap on the exponential retry delay when none is configured
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
/// Batch target for one retry-buffer POST, in KiB
pub const DEFAULT_BATCH_SIZE_KB: usize = 512;

pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Top-level relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// One entry per relay listener
    #[serde(default)]
    pub http: Vec<HttpConfig>,
}

/// Configuration for a single relay listener
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    /// Name identifying this relay (used as a default tag on `/stats`)
    #[serde(default)]
    pub name: String,
    /// Virtual nodes contributed by each shard to the ring
    pub replicas: usize,
    /// Listening `host:port`
    pub bind_addr: String,
    /// Combined certificate/key PEM. TLS termination is delegated to the
    /// fronting terminator; the key is accepted for compatibility.
    #[serde(default)]
    pub ssl_combined_pem: Option<String>,
    /// Retention policy injected into writes that carry none
    #[serde(default)]
    pub default_retention_policy: Option<String>,
    /// Shard name to redundant backends, the current ring
    #[serde(default)]
    pub output: HashMap<String, Vec<BackendConfig>>,
    /// Shard name to redundant backends for the pre-resharding ring
    #[serde(default)]
    pub former: Option<HashMap<String, Vec<BackendConfig>>>,
}

/// Configuration for one backend database
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendConfig {
    /// Name of the backend server
    pub name: String,
    /// Base URL of the backend (e.g. `http://10.0.1.5:8086`)
    pub location: String,
    /// Per-request timeout, e.g. `"10s"` (default 10s)
    #[serde(with = "humantime_serde", default)]
    pub timeout: Option<Duration>,
    /// Health-probe period, e.g. `"10s"` (default 10s)
    #[serde(with = "humantime_serde", default)]
    pub interval: Option<Duration>,
    /// Retry-buffer capacity in MB (0 disables buffering)
    #[serde(default)]
    pub buffer_size_mb: usize,
    /// Maximum batch per buffered POST in KB (default 512)
    #[serde(default)]
    pub max_batch_kb: usize,
    /// Maximum delay between retry attempts, e.g. `"10s"` (default 10s)
    #[serde(with = "humantime_serde", default)]
    pub max_delay_interval: Option<Duration>,
    /// Skip TLS verification for self-signed backends.
    /// WARNING: insecure, development only.
    #[serde(default)]
    pub skip_tls_verification: bool,
}

impl BackendConfig {
    /// Per-request timeout with the default applied
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT)
    }

    /// Probe period with the default applied
    pub fn probe_interval(&self) -> Duration {
        self.interval.unwrap_or(DEFAULT_PROBE_INTERVAL)
    }

    /// Retry-buffer capacity in bytes
    pub fn buffer_size(&self) -> usize {
        self.buffer_size_mb * MB
    }

    /// Batch cap in bytes with the default applied
    pub fn batch_size(&self) -> usize {
        if self.max_batch_kb > 0 {
            self.max_batch_kb * KB
        } else {
            DEFAULT_BATCH_SIZE_KB * KB
        }
    }

    /// Retry-delay cap with the default applied
    pub fn max_delay(&self) -> Duration {
        self.max_delay_interval.unwrap_or(DEFAULT_MAX_DELAY)
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: RelayConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(cfg)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.http.is_empty() {
            return Err(Error::Config("no [[http]] relay configured".to_string()));
        }
        for http in &self.http {
            http.validate()?;
        }
        Ok(())
    }
}

impl HttpConfig {
    /// Validate a single listener entry
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.is_empty() {
            return Err(Error::Config("bind-addr must be set".to_string()));
        }
        if self.replicas == 0 {
            return Err(Error::Config("replicas must be positive".to_string()));
        }
        if self.output.is_empty() {
            return Err(Error::Config(format!(
                "relay '{}' has no output shards",
                self.name
            )));
        }
        for (shard, backends) in self.shard_maps() {
            if backends.is_empty() {
                return Err(Error::Config(format!("shard '{}' has no backends", shard)));
            }
            for b in backends {
                if !b.location.starts_with("http://") && !b.location.starts_with("https://") {
                    return Err(Error::Config(format!(
                        "backend '{}' location '{}' is not an http(s) URL",
                        b.name, b.location
                    )));
                }
            }
        }
        Ok(())
    }

    fn shard_maps(&self) -> impl Iterator<Item = (&String, &Vec<BackendConfig>)> {
        self.output
            .iter()
            .chain(self.former.iter().flat_map(|m| m.iter()))
    }
}

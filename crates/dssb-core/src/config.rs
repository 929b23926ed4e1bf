//! Configuration types for DSSB

use crate::error::{DssError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default remote candidate list
pub const DEFAULT_LIST_URL: &str = "https://bsb.seeks.men/list";

/// Main configuration, built once and handed to every component
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DssbConfig {
    /// Data directory for persistent storage
    pub data_dir: PathBuf,

    /// Discovery configuration
    pub discovery: DiscoveryConfig,

    /// Wire query configuration
    pub query: QueryConfig,
}

impl Default for DssbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./dssb-data"),
            discovery: DiscoveryConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

impl DssbConfig {
    /// Load configuration from a JSON file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw)
            .map_err(|e| DssError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Directory holding the server store
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("servers")
    }
}

/// Discovery and validation configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Remote candidate list endpoint
    pub list_url: String,

    /// Timeout for the candidate list request
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,

    /// Per-candidate query timeout
    #[serde(with = "duration_secs")]
    pub validation_timeout: Duration,

    /// Maximum concurrent validations
    pub max_concurrency: usize,

    /// Auto-refresh period
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,

    /// Consecutive failures before a dynamic server is evicted
    pub max_failures: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            list_url: DEFAULT_LIST_URL.to_string(),
            fetch_timeout: Duration::from_secs(5),
            validation_timeout: Duration::from_secs(3),
            max_concurrency: 10,
            refresh_interval: Duration::from_secs(30 * 60), // 30 minutes
            max_failures: 5,
        }
    }
}

/// Wire query configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Timeout for on-demand queries
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Largest frame a server may declare
    pub max_frame_size: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_frame_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

// Serde helpers for Duration
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

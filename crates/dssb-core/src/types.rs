//! Core types for DSSB

use crate::error::DssError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a game server: `(ip, port)`
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ServerKey {
    pub ip: String,
    pub port: u16,
}

impl ServerKey {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    /// Key under which the record is persisted.
    ///
    /// The ip bytes are followed by a NUL separator and the big-endian port, so
    /// keys of the same host sort together.
    pub fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.ip.len() + 3);
        key.extend_from_slice(self.ip.as_bytes());
        key.push(0);
        key.extend_from_slice(&self.port.to_be_bytes());
        key
    }
}

impl fmt::Debug for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerKey({}:{})", self.ip, self.port)
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ip.contains(':') {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

impl FromStr for ServerKey {
    type Err = DssError;

    /// Parses `ip:port`, or `[v6]:port` for IPv6 literals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| DssError::InvalidAddress(format!("target must be ip:port, got {s:?}")))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(DssError::InvalidAddress(format!("missing host in {s:?}")));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| DssError::InvalidAddress(format!("invalid port in {s:?}")))?;

        Ok(Self::new(host, port))
    }
}

/// How a record entered the store
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerSource {
    /// Entered by hand
    Manual,
    /// Discovered through the remote candidate feed
    Dynamic,
    /// Pinned by the user; never evicted or reclassified by discovery
    Favorite,
}

impl ServerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Dynamic => "dynamic",
            Self::Favorite => "favorite",
        }
    }

    /// Source after an upsert of `incoming` over `existing`. Favorite is sticky.
    pub fn merge(existing: Self, incoming: Self) -> Self {
        if existing == Self::Favorite || incoming == Self::Favorite {
            Self::Favorite
        } else {
            incoming
        }
    }
}

impl fmt::Display for ServerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerSource {
    type Err = DssError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "dynamic" => Ok(Self::Dynamic),
            "favorite" => Ok(Self::Favorite),
            other => Err(DssError::Config(format!("unknown server source: {other}"))),
        }
    }
}

/// Result of one successful listing query
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub info: String,
    pub news: String,
    pub players: u16,
    pub max_players: u16,
    pub icon: Vec<u8>,
}

/// Timestamp in milliseconds since Unix epoch
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_key() {
        let key: ServerKey = "10.0.0.1:4000".parse().unwrap();
        assert_eq!(key, ServerKey::new("10.0.0.1", 4000));
        assert_eq!(key.to_string(), "10.0.0.1:4000");

        let v6: ServerKey = "[::1]:4000".parse().unwrap();
        assert_eq!(v6.ip, "::1");
        assert_eq!(v6.to_string(), "[::1]:4000");

        assert!("10.0.0.1".parse::<ServerKey>().is_err());
        assert!("10.0.0.1:notaport".parse::<ServerKey>().is_err());
        assert!(":4000".parse::<ServerKey>().is_err());
    }

    #[test]
    fn test_storage_key_is_unique_per_port() {
        let a = ServerKey::new("10.0.0.1", 1).storage_key();
        let b = ServerKey::new("10.0.0.1", 256).storage_key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_favorite_is_sticky() {
        use ServerSource::*;
        assert_eq!(ServerSource::merge(Favorite, Dynamic), Favorite);
        assert_eq!(ServerSource::merge(Favorite, Manual), Favorite);
        assert_eq!(ServerSource::merge(Manual, Favorite), Favorite);
        assert_eq!(ServerSource::merge(Manual, Dynamic), Dynamic);
        assert_eq!(ServerSource::merge(Dynamic, Manual), Manual);
    }

    #[test]
    fn test_source_serde_lowercase() {
        let json = serde_json::to_string(&ServerSource::Favorite).unwrap();
        assert_eq!(json, "\"favorite\"");
        assert_eq!("dynamic".parse::<ServerSource>().unwrap(), ServerSource::Dynamic);
    }
}

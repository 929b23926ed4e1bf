//! Error types for DSSB

use std::time::Duration;
use thiserror::Error;

/// Main error type for DSSB
#[derive(Error, Debug)]
pub enum DssError {
    // Network errors
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // Wire protocol errors
    #[error("protocol error: {0}")]
    Protocol(String),

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Candidate list errors
    #[error("failed to fetch server list: {0}")]
    Fetch(String),

    #[error("configuration error: {0}")]
    Config(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DssError {
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::InvalidAddress(_)
        )
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Serialization(_))
    }

    /// A single server could not be queried. Discovery counts these as failures
    /// instead of propagating them.
    pub fn is_query_failure(&self) -> bool {
        self.is_network() || self.is_protocol()
    }
}

/// Result type alias for DSSB
pub type Result<T> = std::result::Result<T, DssError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DssError::Timeout(Duration::from_secs(3)).is_query_failure());
        assert!(DssError::Protocol("bad type".into()).is_query_failure());
        assert!(!DssError::Storage("disk full".into()).is_query_failure());
        assert!(DssError::Serialization("bad json".into()).is_storage());
        assert!(!DssError::Fetch("503".into()).is_storage());
    }
}

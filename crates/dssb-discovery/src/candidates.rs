//! Remote candidate list

use dssb_core::{DiscoveryConfig, DssError, Result, ServerKey};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// One entry of the remote server list
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub trusted: Option<bool>,
    #[serde(default)]
    pub important: Option<bool>,
    #[serde(default)]
    pub website: Option<String>,
}

impl Candidate {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            trusted: None,
            important: None,
            website: None,
        }
    }

    pub fn key(&self) -> ServerKey {
        ServerKey::new(self.ip.clone(), self.port)
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted.unwrap_or(false)
    }

    pub fn is_important(&self) -> bool {
        self.important.unwrap_or(false)
    }
}

/// Where discovery gets its candidates from
pub trait CandidateSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<Vec<Candidate>>> + Send;
}

/// Candidate list served as a JSON array over HTTP
pub struct HttpCandidateSource {
    /// HTTP client
    client: Client,

    /// List endpoint
    url: String,
}

impl HttpCandidateSource {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| DssError::Fetch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.list_url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CandidateSource for HttpCandidateSource {
    async fn fetch(&self) -> Result<Vec<Candidate>> {
        tracing::debug!(url = %self.url, "fetching server list");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DssError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DssError::Fetch(format!("HTTP {status}: {text}")));
        }

        let candidates: Vec<Candidate> = response
            .json()
            .await
            .map_err(|e| DssError::Fetch(format!("invalid server list: {e}")))?;

        tracing::info!(count = candidates.len(), "fetched server list");
        Ok(candidates)
    }
}

/// Fixed candidate list (for development/testing)
pub struct StaticCandidates {
    candidates: Vec<Candidate>,
}

impl StaticCandidates {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

impl CandidateSource for StaticCandidates {
    async fn fetch(&self) -> Result<Vec<Candidate>> {
        Ok(self.candidates.clone())
    }
}

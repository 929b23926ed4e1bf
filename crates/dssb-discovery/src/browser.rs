//! Server browser facade
//!
//! Ties the discovery service, the store and a credential lookup together
//! behind the operations a frontend needs.

use crate::candidates::{CandidateSource, HttpCandidateSource};
use crate::events::{DiscoveryEvent, RefreshSummary};
use crate::refresh::AutoRefreshHandle;
use crate::service::DiscoveryService;
use dssb_core::{
    CredentialLookup, Credentials, DssError, DssbConfig, Result, ServerKey, ServerSnapshot,
    ServerSource,
};
use dssb_protocol::{DssClient, ServerQuery};
use dssb_store::{ServerRecord, ServerStore, StoreHandle, StoreStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Store counts plus credential coverage
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BrowserStats {
    #[serde(flatten)]
    pub store: StoreStats,

    /// Servers with server-specific credentials
    pub with_credentials: usize,
}

pub struct ServerBrowser<Q, C> {
    service: Arc<DiscoveryService<Q, C>>,
    credentials: Arc<dyn CredentialLookup>,
    config: DssbConfig,
    auto_refresh: Mutex<Option<AutoRefreshHandle>>,
}

impl ServerBrowser<DssClient, HttpCandidateSource> {
    /// Open the browser on the configured data directory and list endpoint
    pub fn open(config: DssbConfig, credentials: Arc<dyn CredentialLookup>) -> Result<Self> {
        let query = DssClient::new(&config.query)?;
        let candidates = HttpCandidateSource::new(&config.discovery)?;
        let store = Arc::new(ServerStore::open(config.store_path())?);
        tracing::info!(
            list_url = candidates.url(),
            data_dir = %config.data_dir.display(),
            "opened server browser"
        );
        Ok(Self::with_parts(config, query, candidates, store, credentials))
    }
}

impl<Q, C> ServerBrowser<Q, C>
where
    Q: ServerQuery + 'static,
    C: CandidateSource + 'static,
{
    pub fn with_parts(
        config: DssbConfig,
        query: Q,
        candidates: C,
        store: StoreHandle,
        credentials: Arc<dyn CredentialLookup>,
    ) -> Self {
        let service = Arc::new(DiscoveryService::new(
            query,
            candidates,
            store,
            config.discovery.clone(),
        ));
        Self {
            service,
            credentials,
            config,
            auto_refresh: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<DiscoveryService<Q, C>> {
        &self.service
    }

    pub fn store(&self) -> &StoreHandle {
        self.service.store()
    }

    pub fn config(&self) -> &DssbConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.service.subscribe()
    }

    /// Add a server by hand.
    ///
    /// With `validate`, the server is queried first and nothing is stored if
    /// that fails.
    pub async fn add_manual_server(
        &self,
        key: &ServerKey,
        website: Option<String>,
        validate: bool,
    ) -> Result<ServerRecord> {
        let snapshot = if validate {
            Some(
                self.service
                    .client()
                    .query(key, self.config.query.timeout)
                    .await?,
            )
        } else {
            None
        };

        let store = self.store();
        match &snapshot {
            Some(snapshot) => {
                store
                    .upsert_validated(key, ServerSource::Manual, false, false, website, snapshot)
                    .await?
            }
            None => {
                store
                    .upsert_identity(key, ServerSource::Manual, false, false, website)
                    .await?
            }
        };

        tracing::info!(server = %key, validated = validate, "added manual server");
        store
            .get(key)
            .await?
            .ok_or_else(|| DssError::Internal(format!("server {key} missing after insert")))
    }

    pub async fn remove_server(&self, key: &ServerKey) -> Result<bool> {
        self.store().remove(key).await
    }

    pub async fn get_server(&self, key: &ServerKey) -> Result<Option<ServerRecord>> {
        self.store().get(key).await
    }

    pub async fn server_list(&self, source: Option<ServerSource>) -> Result<Vec<ServerRecord>> {
        self.store().list(source).await
    }

    pub async fn search_servers(&self, query: &str) -> Result<Vec<ServerRecord>> {
        self.store().search(query).await
    }

    /// Flip a server's favorite mark. Returns the new state, or `None` for an unknown server.
    pub async fn toggle_favorite(&self, key: &ServerKey) -> Result<Option<bool>> {
        let Some(record) = self.store().get(key).await? else {
            return Ok(None);
        };
        let favorite = !record.is_favorite();
        if !self.store().set_favorite(key, favorite).await? {
            // Removed in between
            return Ok(None);
        }
        Ok(Some(favorite))
    }

    /// Query one server now and update its record if it is stored.
    ///
    /// An unreachable server yields `None` and counts as a failure.
    pub async fn query_server(&self, key: &ServerKey) -> Result<Option<ServerSnapshot>> {
        match self
            .service
            .client()
            .query(key, self.config.query.timeout)
            .await
        {
            Ok(snapshot) => {
                self.store().apply_success(key, &snapshot).await?;
                Ok(Some(snapshot))
            }
            Err(e) if e.is_query_failure() => {
                tracing::warn!(server = %key, "query failed: {}", e);
                self.store().apply_failure(key).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// One discovery cycle with the configured timeout and concurrency
    pub async fn refresh_dynamic_servers(&self) -> Result<RefreshSummary> {
        let discovery = &self.config.discovery;
        self.service
            .refresh(discovery.validation_timeout, discovery.max_concurrency)
            .await
    }

    /// Re-query every stored server. Returns `(succeeded, failed)`.
    pub async fn refresh_all_servers(&self) -> Result<(usize, usize)> {
        self.service
            .revalidate_all(self.config.discovery.validation_timeout)
            .await
    }

    pub async fn cleanup_dead_servers(&self) -> Result<Vec<ServerKey>> {
        self.service
            .cleanup(self.config.discovery.max_failures)
            .await
    }

    /// Start the periodic refresh loop. Returns false if one is already running.
    pub async fn start_auto_refresh(&self) -> bool {
        let mut slot = self.auto_refresh.lock().await;
        if slot.as_ref().is_some_and(AutoRefreshHandle::is_running) {
            tracing::warn!("auto-refresh already running");
            return false;
        }
        *slot = Some(
            self.service
                .auto_refresh(self.config.discovery.refresh_interval),
        );
        true
    }

    /// Stop the periodic refresh loop and wait for it to exit.
    /// Returns false if none was running.
    pub async fn stop_auto_refresh(&self) -> bool {
        let Some(handle) = self.auto_refresh.lock().await.take() else {
            return false;
        };
        handle.stop();
        handle.join().await;
        true
    }

    pub async fn is_auto_refreshing(&self) -> bool {
        self.auto_refresh
            .lock()
            .await
            .as_ref()
            .is_some_and(AutoRefreshHandle::is_running)
    }

    pub fn credentials_for(&self, key: &ServerKey) -> Option<Credentials> {
        self.credentials.credentials_with_fallback(key)
    }

    pub async fn statistics(&self) -> Result<BrowserStats> {
        let store = self.store().statistics().await?;
        let with_credentials = self
            .store()
            .all_keys()
            .await?
            .iter()
            .filter(|key| self.credentials.has_credentials(key))
            .count();
        Ok(BrowserStats {
            store,
            with_credentials,
        })
    }
}

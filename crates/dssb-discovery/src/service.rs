//! Discovery and validation service
//!
//! Fetches the remote candidate list, queries every candidate through a
//! bounded worker pool and reconciles the outcomes into the server store.
//! A single server's network or protocol failure only ever becomes a failure
//! count; storage faults are always returned to the caller.

use crate::candidates::{Candidate, CandidateSource};
use crate::events::{DiscoveryEvent, RefreshSummary};
use crate::refresh::AutoRefreshHandle;
use dssb_core::{DiscoveryConfig, DssError, Result, ServerKey, ServerSource};
use dssb_protocol::ServerQuery;
use dssb_store::StoreHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

/// Discovery engine over a query client, a candidate source and the store
pub struct DiscoveryService<Q, C> {
    /// Listing client
    query: Q,

    /// Remote candidate list
    candidates: C,

    /// Server store
    store: StoreHandle,

    /// Discovery configuration
    config: DiscoveryConfig,

    /// Event broadcaster
    events: broadcast::Sender<DiscoveryEvent>,
}

impl<Q, C> DiscoveryService<Q, C>
where
    Q: ServerQuery + 'static,
    C: CandidateSource + 'static,
{
    pub fn new(query: Q, candidates: C, store: StoreHandle, config: DiscoveryConfig) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            query,
            candidates,
            store,
            config,
            events,
        }
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn client(&self) -> &Q {
        &self.query
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    fn emit(&self, event: DiscoveryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Fetch the remote candidate list.
    ///
    /// A failed fetch is reported as an `Error` event and yields an empty list.
    pub async fn fetch_candidates(&self) -> Vec<Candidate> {
        match self.candidates.fetch().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("{}", e);
                self.emit(DiscoveryEvent::Error {
                    message: e.to_string(),
                });
                Vec::new()
            }
        }
    }

    /// Query one candidate and record the outcome.
    ///
    /// Success adds (or re-adds) the server as dynamic and stores its listing.
    /// Failure counts against a server already in the store and leaves no
    /// trace for one that is not. Only storage faults are returned as errors.
    pub async fn validate_one(&self, candidate: &Candidate, timeout: Duration) -> Result<bool> {
        let key = candidate.key();

        match self.query.query(&key, timeout).await {
            Ok(snapshot) => {
                self.store
                    .upsert_validated(
                        &key,
                        ServerSource::Dynamic,
                        candidate.is_trusted(),
                        candidate.is_important(),
                        candidate.website.clone(),
                        &snapshot,
                    )
                    .await?;

                tracing::debug!(server = %key, name = %snapshot.name, "validated server");
                self.emit(DiscoveryEvent::ServerValidated {
                    key,
                    name: snapshot.name,
                    players: snapshot.players,
                    max_players: snapshot.max_players,
                });
                Ok(true)
            }
            Err(e) => {
                let known = self.store.apply_failure(&key).await?;
                if known {
                    tracing::warn!(server = %key, "query failed: {}", e);
                } else {
                    tracing::debug!(server = %key, "candidate unreachable: {}", e);
                }
                self.emit(DiscoveryEvent::ServerFailed {
                    key,
                    error: e.to_string(),
                });
                Ok(false)
            }
        }
    }

    /// Fetch the candidate list and validate every entry with at most
    /// `max_concurrency` queries in flight.
    ///
    /// A storage fault does not stop the batch: it is reported as an `Error`
    /// event, the candidate counts as failed and the first such fault is
    /// returned after the completion event.
    pub async fn refresh(
        self: &Arc<Self>,
        validation_timeout: Duration,
        max_concurrency: usize,
    ) -> Result<RefreshSummary> {
        self.emit(DiscoveryEvent::FetchStarted);

        let candidates = self.fetch_candidates().await;
        if candidates.is_empty() {
            tracing::info!("no servers returned from candidate list");
            let summary = RefreshSummary::default();
            self.emit(DiscoveryEvent::FetchCompleted(summary));
            return Ok(summary);
        }

        let max_concurrency = max_concurrency.max(1);
        let mut summary = RefreshSummary {
            total: candidates.len(),
            ..Default::default()
        };
        let mut storage_error: Option<DssError> = None;
        let mut tasks = JoinSet::new();

        tracing::info!(total = summary.total, max_concurrency, "validating servers");

        for candidate in candidates {
            while tasks.len() >= max_concurrency {
                if let Some(joined) = tasks.join_next().await {
                    self.tally(joined, &mut summary, &mut storage_error);
                }
            }

            let this = Arc::clone(self);
            tasks.spawn(async move { this.validate_one(&candidate, validation_timeout).await });
        }

        while let Some(joined) = tasks.join_next().await {
            self.tally(joined, &mut summary, &mut storage_error);
        }

        tracing::info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "refresh complete"
        );
        self.emit(DiscoveryEvent::FetchCompleted(summary));

        match storage_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn tally(
        &self,
        joined: std::result::Result<Result<bool>, tokio::task::JoinError>,
        summary: &mut RefreshSummary,
        storage_error: &mut Option<DssError>,
    ) {
        match joined {
            Ok(Ok(true)) => summary.succeeded += 1,
            Ok(Ok(false)) => summary.failed += 1,
            Ok(Err(e)) => {
                summary.failed += 1;
                tracing::error!("storage fault during validation: {}", e);
                self.emit(DiscoveryEvent::Error {
                    message: e.to_string(),
                });
                storage_error.get_or_insert(e);
            }
            Err(e) => {
                summary.failed += 1;
                tracing::error!("validation task failed: {}", e);
            }
        }
    }

    /// Re-query every stored server, one at a time, in listing order.
    ///
    /// Returns `(succeeded, failed)`.
    pub async fn revalidate_all(&self, timeout: Duration) -> Result<(usize, usize)> {
        let records = self.store.list(None).await?;
        let mut succeeded = 0;
        let mut failed = 0;

        for record in records {
            let key = record.key();
            match self.query.query(&key, timeout).await {
                Ok(snapshot) => {
                    self.store.apply_success(&key, &snapshot).await?;
                    succeeded += 1;
                    self.emit(DiscoveryEvent::ServerValidated {
                        key,
                        name: snapshot.name,
                        players: snapshot.players,
                        max_players: snapshot.max_players,
                    });
                }
                Err(e) => {
                    self.store.apply_failure(&key).await?;
                    failed += 1;
                    tracing::warn!(server = %key, "failed to revalidate: {}", e);
                    self.emit(DiscoveryEvent::ServerFailed {
                        key,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(succeeded, failed, "revalidation complete");
        Ok((succeeded, failed))
    }

    /// Evict dynamic servers with at least `max_failures` consecutive failures.
    pub async fn cleanup(&self, max_failures: u32) -> Result<Vec<ServerKey>> {
        let removed = self.store.evict_failed(max_failures).await?;
        tracing::info!(removed = removed.len(), max_failures, "removed failed servers");
        Ok(removed)
    }

    /// Run `refresh` now and then every `interval` until stopped.
    ///
    /// Stopping prevents the next cycle; a cycle already running completes.
    /// Dropping the handle stops the loop the same way.
    pub fn auto_refresh(self: &Arc<Self>, interval: Duration) -> AutoRefreshHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let validation_timeout = self.config.validation_timeout;
        let max_concurrency = self.config.max_concurrency;

        let task = tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    break;
                }

                match this.refresh(validation_timeout, max_concurrency).await {
                    Err(e) if e.is_storage() => tracing::error!("auto-refresh cycle failed: {}", e),
                    Err(e) => tracing::warn!("auto-refresh cycle failed: {}", e),
                    Ok(_) => {}
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("auto-refresh stopped");
        });

        tracing::info!(interval_secs = interval.as_secs(), "auto-refresh started");
        AutoRefreshHandle::new(stop_tx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::StaticCandidates;
    use crate::testing::{snapshot, MockQuery};
    use dssb_store::ServerStore;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(1);

    struct FailingCandidates;

    impl CandidateSource for FailingCandidates {
        async fn fetch(&self) -> Result<Vec<Candidate>> {
            Err(DssError::Fetch("HTTP 503".into()))
        }
    }

    fn store() -> (TempDir, StoreHandle) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(ServerStore::open(temp_dir.path()).unwrap());
        (temp_dir, store)
    }

    fn service<C: CandidateSource + 'static>(
        query: MockQuery,
        candidates: C,
        store: StoreHandle,
    ) -> Arc<DiscoveryService<MockQuery, C>> {
        Arc::new(DiscoveryService::new(
            query,
            candidates,
            store,
            DiscoveryConfig::default(),
        ))
    }

    fn drain(rx: &mut broadcast::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_refresh_counts_and_persists_successes() {
        let (_dir, store) = store();
        let query = MockQuery::new();
        let a = ServerKey::new("10.0.0.1", 4000);
        let b = ServerKey::new("10.0.0.2", 4000);
        query.respond(a.clone(), snapshot("Alpha", 3));
        query.respond(b.clone(), snapshot("Beta", 8));

        let mut trusted = Candidate::new("10.0.0.1", 4000);
        trusted.trusted = Some(true);
        trusted.website = Some("https://alpha.example".into());
        let candidates = StaticCandidates::new(vec![
            trusted,
            Candidate::new("10.0.0.2", 4000),
            Candidate::new("10.0.0.3", 4000),
        ]);

        let service = service(query, candidates, store.clone());
        let mut rx = service.subscribe();

        let summary = service.refresh(TIMEOUT, 10).await.unwrap();
        assert_eq!(
            summary,
            RefreshSummary {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );

        let records = store.list(None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.source == ServerSource::Dynamic));

        let alpha = store.get(&a).await.unwrap().unwrap();
        assert!(alpha.trusted);
        assert_eq!(alpha.name.as_deref(), Some("Alpha"));
        assert_eq!(alpha.website.as_deref(), Some("https://alpha.example"));
        assert!(store.get(&ServerKey::new("10.0.0.3", 4000)).await.unwrap().is_none());

        let events = drain(&mut rx);
        assert_eq!(events.first(), Some(&DiscoveryEvent::FetchStarted));
        assert_eq!(events.last(), Some(&DiscoveryEvent::FetchCompleted(summary)));
        let validated = events
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::ServerValidated { .. }))
            .count();
        assert_eq!(validated, 2);
        assert!(events.iter().any(|e| matches!(
            e,
            DiscoveryEvent::ServerFailed { key, .. } if key.ip == "10.0.0.3"
        )));
    }

    #[tokio::test]
    async fn test_failed_fetch_reports_error_and_zero_counts() {
        let (_dir, store) = store();
        store
            .upsert_identity(&ServerKey::new("10.0.0.1", 1), ServerSource::Dynamic, false, false, None)
            .await
            .unwrap();

        let service = service(MockQuery::new(), FailingCandidates, store.clone());
        let mut rx = service.subscribe();

        let summary = service.refresh(TIMEOUT, 10).await.unwrap();
        assert_eq!(summary, RefreshSummary::default());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], DiscoveryEvent::FetchStarted);
        assert!(matches!(&events[1], DiscoveryEvent::Error { message } if message.contains("503")));
        assert_eq!(events[2], DiscoveryEvent::FetchCompleted(RefreshSummary::default()));

        // Store untouched
        let record = store.get(&ServerKey::new("10.0.0.1", 1)).await.unwrap().unwrap();
        assert_eq!(record.query_failures, 0);
        assert!(service.client().calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_list_completes_without_error_event() {
        let (_dir, store) = store();
        let service = service(MockQuery::new(), StaticCandidates::new(Vec::new()), store);
        let mut rx = service.subscribe();

        service.refresh(TIMEOUT, 10).await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                DiscoveryEvent::FetchStarted,
                DiscoveryEvent::FetchCompleted(RefreshSummary::default())
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_counts_only_for_known_servers() {
        let (_dir, store) = store();
        let known = ServerKey::new("10.0.0.1", 4000);
        store
            .upsert_identity(&known, ServerSource::Dynamic, false, false, None)
            .await
            .unwrap();

        let service = service(MockQuery::new(), StaticCandidates::new(Vec::new()), store.clone());

        assert!(!service.validate_one(&Candidate::new("10.0.0.1", 4000), TIMEOUT).await.unwrap());
        assert!(!service.validate_one(&Candidate::new("10.0.0.9", 4000), TIMEOUT).await.unwrap());

        assert_eq!(store.get(&known).await.unwrap().unwrap().query_failures, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rediscovery_keeps_favorite() {
        let (_dir, store) = store();
        let key = ServerKey::new("10.0.0.1", 4000);
        store
            .upsert_identity(&key, ServerSource::Favorite, false, false, None)
            .await
            .unwrap();
        store.apply_failure(&key).await.unwrap();

        let query = MockQuery::new();
        query.respond(key.clone(), snapshot("Fav", 1));
        let service = service(query, StaticCandidates::new(Vec::new()), store.clone());

        assert!(service.validate_one(&Candidate::new("10.0.0.1", 4000), TIMEOUT).await.unwrap());
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.source, ServerSource::Favorite);
        assert_eq!(record.query_failures, 0);
    }

    #[tokio::test]
    async fn test_refresh_respects_concurrency_limit() {
        let (_dir, store) = store();
        let query = MockQuery::with_delay(Duration::from_millis(20));
        let candidates: Vec<_> = (0..12)
            .map(|n| {
                let c = Candidate::new(format!("10.0.1.{n}"), 4000);
                query.respond(c.key(), snapshot(&format!("S{n}"), n));
                c
            })
            .collect();

        let service = service(query, StaticCandidates::new(candidates), store.clone());
        let summary = service.refresh(TIMEOUT, 3).await.unwrap();

        assert_eq!(summary.succeeded, 12);
        assert_eq!(service.client().calls().len(), 12);
        assert!(service.client().max_in_flight() <= 3);
        assert!(service.client().max_in_flight() >= 2);
        assert_eq!(store.len().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn test_revalidate_all_is_sequential_over_every_source() {
        let (_dir, store) = store();
        let up = ServerKey::new("10.0.0.1", 1);
        let down_manual = ServerKey::new("10.0.0.2", 1);
        let down_favorite = ServerKey::new("10.0.0.3", 1);

        store.upsert_identity(&up, ServerSource::Dynamic, false, true, None).await.unwrap();
        store.upsert_identity(&down_manual, ServerSource::Manual, false, false, None).await.unwrap();
        store.upsert_identity(&down_favorite, ServerSource::Favorite, false, false, None).await.unwrap();

        let query = MockQuery::with_delay(Duration::from_millis(5));
        query.respond(up.clone(), snapshot("Up", 4));
        let service = service(query, StaticCandidates::new(Vec::new()), store.clone());

        let (ok, failed) = service.revalidate_all(TIMEOUT).await.unwrap();
        assert_eq!((ok, failed), (1, 2));
        assert_eq!(service.client().max_in_flight(), 1);
        assert_eq!(service.client().calls().len(), 3);

        assert_eq!(store.get(&up).await.unwrap().unwrap().players, Some(4));
        assert_eq!(store.get(&down_manual).await.unwrap().unwrap().query_failures, 1);
        assert_eq!(store.get(&down_favorite).await.unwrap().unwrap().query_failures, 1);
    }

    #[tokio::test]
    async fn test_cleanup_after_repeated_failures() {
        let (_dir, store) = store();
        let dynamic = ServerKey::new("10.0.0.1", 1);
        let manual = ServerKey::new("10.0.0.2", 1);
        store.upsert_identity(&dynamic, ServerSource::Dynamic, false, false, None).await.unwrap();
        store.upsert_identity(&manual, ServerSource::Manual, false, false, None).await.unwrap();

        let service = service(MockQuery::new(), StaticCandidates::new(Vec::new()), store.clone());
        for _ in 0..3 {
            service.revalidate_all(TIMEOUT).await.unwrap();
        }

        assert!(service.cleanup(4).await.unwrap().is_empty());
        assert_eq!(service.cleanup(3).await.unwrap(), vec![dynamic]);
        assert!(store.get(&manual).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_auto_refresh_runs_until_stopped() {
        let (_dir, store) = store();
        let query = MockQuery::new();
        query.respond(ServerKey::new("10.0.0.1", 1), snapshot("Loop", 1));
        let service = service(
            query,
            StaticCandidates::new(vec![Candidate::new("10.0.0.1", 1)]),
            store,
        );
        let mut rx = service.subscribe();

        let handle = service.auto_refresh(Duration::from_millis(20));
        let mut completed = 0;
        while completed < 3 {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, DiscoveryEvent::FetchCompleted(_)) {
                completed += 1;
            }
        }

        assert!(handle.is_running());
        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
        assert!(service.client().calls().len() >= 3);
    }

    #[tokio::test]
    async fn test_stop_interrupts_long_sleep() {
        let (_dir, store) = store();
        let service = service(MockQuery::new(), StaticCandidates::new(Vec::new()), store);
        let mut rx = service.subscribe();

        let handle = service.auto_refresh(Duration::from_secs(3600));
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, DiscoveryEvent::FetchCompleted(_)) {
                break;
            }
        }

        handle.stop();
        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .unwrap();

        // Exactly one cycle ran
        let started = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == DiscoveryEvent::FetchStarted)
            .count();
        assert_eq!(started, 0);
    }
}

//! Test doubles

use dssb_core::{DssError, Result, ServerKey, ServerSnapshot};
use dssb_protocol::ServerQuery;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory `ServerQuery`: known keys answer, unknown keys fail with a network error.
#[derive(Default)]
pub struct MockQuery {
    responses: DashMap<ServerKey, ServerSnapshot>,
    delay: Duration,
    calls: Mutex<Vec<ServerKey>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn respond(&self, key: ServerKey, snapshot: ServerSnapshot) {
        self.responses.insert(key, snapshot);
    }

    pub fn go_offline(&self, key: &ServerKey) {
        self.responses.remove(key);
    }

    pub fn calls(&self) -> Vec<ServerKey> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ServerQuery for MockQuery {
    async fn query(&self, key: &ServerKey, _timeout: Duration) -> Result<ServerSnapshot> {
        self.calls.lock().unwrap().push(key.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.responses
            .get(key)
            .map(|s| s.clone())
            .ok_or_else(|| DssError::Network(format!("connect to {key}: connection refused")))
    }
}

pub fn snapshot(name: &str, players: u16) -> ServerSnapshot {
    ServerSnapshot {
        name: name.into(),
        info: format!("{name} info"),
        news: "patch notes".into(),
        players,
        max_players: 50,
        icon: b"\x89PNG".to_vec(),
    }
}

//! Persisted server record

use dssb_core::{ServerKey, ServerSnapshot, ServerSource, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A known game server
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Store-assigned id, stable for the life of the record
    pub id: u64,

    pub ip: String,
    pub port: u16,

    /// Listing fields, absent until the first successful query
    pub name: Option<String>,
    pub info: Option<String>,
    pub news: Option<String>,
    pub players: Option<u16>,
    pub max_players: Option<u16>,

    /// Raw icon bytes from the last successful query
    #[serde(default)]
    pub icon: Vec<u8>,

    pub website: Option<String>,

    pub source: ServerSource,
    pub trusted: bool,
    pub important: bool,

    /// Last add or re-discovery
    pub last_seen: Option<Timestamp>,

    /// Last query attempt, successful or not
    pub last_queried: Option<Timestamp>,

    /// Consecutive failed queries
    pub query_failures: u32,

    pub added_date: Timestamp,
}

impl ServerRecord {
    pub(crate) fn new(
        id: u64,
        key: &ServerKey,
        source: ServerSource,
        trusted: bool,
        important: bool,
        website: Option<String>,
    ) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            ip: key.ip.clone(),
            port: key.port,
            name: None,
            info: None,
            news: None,
            players: None,
            max_players: None,
            icon: Vec::new(),
            website,
            source,
            trusted,
            important,
            last_seen: Some(now),
            last_queried: None,
            query_failures: 0,
            added_date: now,
        }
    }

    pub fn key(&self) -> ServerKey {
        ServerKey::new(self.ip.clone(), self.port)
    }

    pub fn is_favorite(&self) -> bool {
        self.source == ServerSource::Favorite
    }

    /// Merge a re-add of the same identity into this record.
    pub(crate) fn merge_identity(
        &mut self,
        source: ServerSource,
        trusted: bool,
        important: bool,
        website: Option<String>,
    ) {
        self.source = ServerSource::merge(self.source, source);
        self.trusted = trusted;
        self.important = important;
        if website.is_some() {
            self.website = website;
        }
        self.last_seen = Some(Timestamp::now());
    }

    pub(crate) fn apply_snapshot(&mut self, snapshot: &ServerSnapshot) {
        self.name = Some(snapshot.name.clone());
        self.info = Some(snapshot.info.clone());
        self.news = Some(snapshot.news.clone());
        self.players = Some(snapshot.players);
        self.max_players = Some(snapshot.max_players);
        self.icon = snapshot.icon.clone();
        self.last_queried = Some(Timestamp::now());
        self.query_failures = 0;
    }

    pub(crate) fn record_failure(&mut self) {
        self.query_failures = self.query_failures.saturating_add(1);
        self.last_queried = Some(Timestamp::now());
    }

    /// Case-insensitive substring match over name, info and ip.
    /// `needle` must already be lowercase.
    pub(crate) fn matches(&self, needle: &str) -> bool {
        let hit = |field: Option<&str>| {
            field
                .map(|f| f.to_lowercase().contains(needle))
                .unwrap_or(false)
        };
        hit(self.name.as_deref()) || hit(self.info.as_deref()) || hit(Some(&self.ip))
    }
}

/// Listing order: important first, then trusted, then most players.
/// Servers never queried sort after all queried ones; ties break on `(ip, port)`.
pub fn listing_order(a: &ServerRecord, b: &ServerRecord) -> Ordering {
    b.important
        .cmp(&a.important)
        .then(b.trusted.cmp(&a.trusted))
        .then_with(|| b.players.cmp(&a.players))
        .then_with(|| (&a.ip, a.port).cmp(&(&b.ip, b.port)))
}

/// Empty strings count as "no website".
pub(crate) fn normalize_website(website: Option<String>) -> Option<String> {
    website.filter(|w| !w.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ip: &str, important: bool, trusted: bool, players: Option<u16>) -> ServerRecord {
        let mut r = ServerRecord::new(
            0,
            &ServerKey::new(ip, 4000),
            ServerSource::Dynamic,
            trusted,
            important,
            None,
        );
        r.players = players;
        r
    }

    #[test]
    fn test_listing_order() {
        let mut records = vec![
            record("10.0.0.5", false, false, None),
            record("10.0.0.4", false, false, Some(3)),
            record("10.0.0.3", false, true, Some(0)),
            record("10.0.0.2", true, false, Some(1)),
            record("10.0.0.1", false, false, Some(3)),
        ];
        records.sort_by(listing_order);

        let ips: Vec<_> = records.iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(ips, ["10.0.0.2", "10.0.0.3", "10.0.0.1", "10.0.0.4", "10.0.0.5"]);
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let mut r = record("192.168.1.10", false, false, None);
        r.name = Some("Dark Castle".into());
        r.info = Some("PvP Arena".into());

        assert!(r.matches("castle"));
        assert!(r.matches("pvp"));
        assert!(r.matches("168.1"));
        assert!(!r.matches("forest"));
    }

    #[test]
    fn test_failure_then_snapshot() {
        let mut r = record("10.0.0.1", false, false, None);
        r.record_failure();
        r.record_failure();
        assert_eq!(r.query_failures, 2);
        assert!(r.last_queried.is_some());

        r.apply_snapshot(&ServerSnapshot {
            name: "A".into(),
            players: 4,
            ..Default::default()
        });
        assert_eq!(r.query_failures, 0);
        assert_eq!(r.name.as_deref(), Some("A"));
        assert_eq!(r.players, Some(4));
    }

    #[test]
    fn test_normalize_website() {
        assert_eq!(normalize_website(Some(String::new())), None);
        assert_eq!(normalize_website(Some("  ".into())), None);
        assert_eq!(
            normalize_website(Some("https://example.org".into())),
            Some("https://example.org".into())
        );
    }
}

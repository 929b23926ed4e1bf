//! Server store backed by RocksDB
//!
//! Records are JSON-encoded under their `(ip, port)` storage key. The next
//! record id lives in the `meta` column family and is written in the same
//! batch as the record that consumes it. Every read-modify-write on a key
//! runs under that key's lock, so concurrent upserts of one server are
//! serialized while different servers proceed in parallel. Set-wide
//! operations (eviction) take the write side of a barrier that all per-key
//! mutations hold for reading.

use crate::record::{listing_order, normalize_website, ServerRecord};
use dashmap::DashMap;
use dssb_core::{DssError, Result, ServerKey, ServerSnapshot, ServerSource};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard};

/// Column family names
const CF_SERVERS: &str = "servers";
const CF_META: &str = "meta";

/// Metadata keys
const KEY_NEXT_ID: &[u8] = b"next_id";

fn storage_err(e: rocksdb::Error) -> DssError {
    DssError::Storage(e.to_string())
}

/// Counts over the stored servers
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub manual: usize,
    pub dynamic: usize,
    pub favorites: usize,
    pub trusted: usize,
    pub important: usize,
}

/// Durable keyed collection of server records
pub struct ServerStore {
    /// RocksDB instance
    db: Arc<DB>,

    /// One lock per server key, created on first use and kept for the store's lifetime
    key_locks: DashMap<ServerKey, Arc<Mutex<()>>>,

    /// Held shared by per-key mutations, exclusively by set-wide deletes
    barrier: RwLock<()>,

    /// Next record id, mirrored in the meta column family
    next_id: Mutex<u64>,
}

impl ServerStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_SERVERS, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors).map_err(storage_err)?;

        let mut store = Self {
            db: Arc::new(db),
            key_locks: DashMap::new(),
            barrier: RwLock::new(()),
            next_id: Mutex::new(1),
        };

        let next_id = store.load_next_id()?;
        *store.next_id.get_mut() = next_id;

        tracing::debug!(path = %path.display(), next_id, "opened server store");
        Ok(store)
    }

    /// Persisted id counter. Stores written before the counter existed
    /// resume after their highest record id.
    fn load_next_id(&self) -> Result<u64> {
        let stored = self
            .db
            .get_cf(self.cf_meta()?, KEY_NEXT_ID)
            .map_err(storage_err)?
            .map(|data| {
                <[u8; 8]>::try_from(data.as_slice())
                    .map(u64::from_be_bytes)
                    .map_err(|_| DssError::Serialization("malformed next_id".into()))
            })
            .transpose()?;

        let max_id = self.scan()?.iter().map(|r| r.id).max().unwrap_or(0);
        Ok(stored.unwrap_or(1).max(max_id + 1))
    }

    /// Get the servers column family
    fn cf_servers(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_SERVERS)
            .ok_or_else(|| DssError::Storage("servers cf not found".into()))
    }

    /// Get the meta column family
    fn cf_meta(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_META)
            .ok_or_else(|| DssError::Storage("meta cf not found".into()))
    }

    /// Lock one key for a read-modify-write
    async fn lock_key(&self, key: &ServerKey) -> (RwLockReadGuard<'_, ()>, OwnedMutexGuard<()>) {
        let barrier = self.barrier.read().await;
        let lock = self
            .key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        (barrier, lock.lock_owned().await)
    }

    fn load(&self, key: &ServerKey) -> Result<Option<ServerRecord>> {
        match self
            .db
            .get_cf(self.cf_servers()?, key.storage_key())
            .map_err(storage_err)?
        {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| DssError::Serialization(format!("record {key}: {e}"))),
            None => Ok(None),
        }
    }

    fn encode(record: &ServerRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| DssError::Serialization(e.to_string()))
    }

    fn save(&self, record: &ServerRecord) -> Result<()> {
        self.db
            .put_cf(self.cf_servers()?, record.key().storage_key(), Self::encode(record)?)
            .map_err(storage_err)
    }

    /// Save a new record together with the advanced id counter.
    async fn insert(&self, build: impl FnOnce(u64) -> ServerRecord) -> Result<ServerRecord> {
        let mut next_id = self.next_id.lock().await;
        let id = *next_id;
        let record = build(id);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_servers()?, record.key().storage_key(), Self::encode(&record)?);
        batch.put_cf(self.cf_meta()?, KEY_NEXT_ID, (id + 1).to_be_bytes());
        self.db.write(batch).map_err(storage_err)?;

        *next_id = id + 1;
        Ok(record)
    }

    /// Drop the lock entry of a key nobody is waiting on
    fn prune_lock(&self, key: &ServerKey) {
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Every stored record, in key order
    fn scan(&self) -> Result<Vec<ServerRecord>> {
        let mut records = Vec::new();
        for item in self.db.iterator_cf(self.cf_servers()?, IteratorMode::Start) {
            let (_, value) = item.map_err(storage_err)?;
            let record: ServerRecord = serde_json::from_slice(&value)
                .map_err(|e| DssError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Load, mutate and save one existing record. Returns false if it does not exist.
    async fn update<F>(&self, key: &ServerKey, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut ServerRecord),
    {
        // Unknown keys never get a lock entry
        if self.load(key)?.is_none() {
            return Ok(false);
        }

        let updated = {
            let _guard = self.lock_key(key).await;
            match self.load(key)? {
                Some(mut record) => {
                    mutate(&mut record);
                    self.save(&record)?;
                    true
                }
                None => false,
            }
        };

        // Removed while we waited
        if !updated {
            self.prune_lock(key);
        }
        Ok(updated)
    }

    /// Insert a server or merge a re-add into the existing record.
    ///
    /// Favorite is sticky, `trusted`/`important` take the new values, the
    /// website is replaced only by a non-empty one and `last_seen` is refreshed.
    pub async fn upsert_identity(
        &self,
        key: &ServerKey,
        source: ServerSource,
        trusted: bool,
        important: bool,
        website: Option<String>,
    ) -> Result<u64> {
        self.upsert(key, source, trusted, important, website, None)
            .await
    }

    /// `upsert_identity` followed by `apply_success`, under one key lock.
    pub async fn upsert_validated(
        &self,
        key: &ServerKey,
        source: ServerSource,
        trusted: bool,
        important: bool,
        website: Option<String>,
        snapshot: &ServerSnapshot,
    ) -> Result<u64> {
        self.upsert(key, source, trusted, important, website, Some(snapshot))
            .await
    }

    async fn upsert(
        &self,
        key: &ServerKey,
        source: ServerSource,
        trusted: bool,
        important: bool,
        website: Option<String>,
        snapshot: Option<&ServerSnapshot>,
    ) -> Result<u64> {
        let website = normalize_website(website);
        let _guard = self.lock_key(key).await;

        match self.load(key)? {
            Some(mut existing) => {
                existing.merge_identity(source, trusted, important, website);
                if let Some(snapshot) = snapshot {
                    existing.apply_snapshot(snapshot);
                }
                self.save(&existing)?;
                Ok(existing.id)
            }
            None => {
                let record = self
                    .insert(|id| {
                        let mut record =
                            ServerRecord::new(id, key, source, trusted, important, website);
                        if let Some(snapshot) = snapshot {
                            record.apply_snapshot(snapshot);
                        }
                        record
                    })
                    .await?;
                tracing::debug!(server = %key, id = record.id, %source, "added server");
                Ok(record.id)
            }
        }
    }

    /// Store a successful query result and reset the failure counter.
    pub async fn apply_success(&self, key: &ServerKey, snapshot: &ServerSnapshot) -> Result<bool> {
        self.update(key, |record| record.apply_snapshot(snapshot)).await
    }

    /// Count a failed query. No-op for unknown servers.
    pub async fn apply_failure(&self, key: &ServerKey) -> Result<bool> {
        self.update(key, ServerRecord::record_failure).await
    }

    /// Get a single server
    pub async fn get(&self, key: &ServerKey) -> Result<Option<ServerRecord>> {
        self.load(key)
    }

    /// All servers, optionally of one source, in listing order
    pub async fn list(&self, source: Option<ServerSource>) -> Result<Vec<ServerRecord>> {
        let mut records = self.scan()?;
        if let Some(source) = source {
            records.retain(|r| r.source == source);
        }
        records.sort_by(listing_order);
        Ok(records)
    }

    /// Case-insensitive substring search over name, info and ip, in listing order
    pub async fn search(&self, query: &str) -> Result<Vec<ServerRecord>> {
        let needle = query.to_lowercase();
        let mut records = self.scan()?;
        records.retain(|r| r.matches(&needle));
        records.sort_by(listing_order);
        Ok(records)
    }

    /// Remove a server. Returns false if it was not stored.
    pub async fn remove(&self, key: &ServerKey) -> Result<bool> {
        if self.load(key)?.is_none() {
            return Ok(false);
        }

        let removed = {
            let _guard = self.lock_key(key).await;
            if self.load(key)?.is_some() {
                self.db
                    .delete_cf(self.cf_servers()?, key.storage_key())
                    .map_err(storage_err)?;
                true
            } else {
                false
            }
        };
        self.prune_lock(key);

        if removed {
            tracing::debug!(server = %key, "removed server");
        }
        Ok(removed)
    }

    /// Mark or unmark a favorite.
    ///
    /// Unmarking always demotes to `manual`, whatever the record's origin was.
    pub async fn set_favorite(&self, key: &ServerKey, is_favorite: bool) -> Result<bool> {
        self.update(key, |record| {
            if is_favorite {
                record.source = ServerSource::Favorite;
            } else if record.source == ServerSource::Favorite {
                record.source = ServerSource::Manual;
            }
        })
        .await
    }

    /// Delete every dynamic server with at least `threshold` consecutive failures.
    pub async fn evict_failed(&self, threshold: u32) -> Result<Vec<ServerKey>> {
        let _barrier = self.barrier.write().await;
        let cf = self.cf_servers()?;

        let mut batch = WriteBatch::default();
        let mut removed = Vec::new();
        for record in self.scan()? {
            if record.source == ServerSource::Dynamic && record.query_failures >= threshold {
                let key = record.key();
                batch.delete_cf(cf, key.storage_key());
                removed.push(key);
            }
        }

        if !removed.is_empty() {
            self.db.write(batch).map_err(storage_err)?;
            for key in &removed {
                self.prune_lock(key);
            }
        }
        Ok(removed)
    }

    /// Keys of every stored server, in key order
    pub async fn all_keys(&self) -> Result<Vec<ServerKey>> {
        Ok(self.scan()?.iter().map(ServerRecord::key).collect())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.scan()?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn statistics(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for record in self.scan()? {
            stats.total += 1;
            match record.source {
                ServerSource::Manual => stats.manual += 1,
                ServerSource::Dynamic => stats.dynamic += 1,
                ServerSource::Favorite => stats.favorites += 1,
            }
            stats.trusted += record.trusted as usize;
            stats.important += record.important as usize;
        }
        Ok(stats)
    }
}

/// Shared store handle
pub type StoreHandle = Arc<ServerStore>;

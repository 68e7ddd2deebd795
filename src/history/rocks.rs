//! RocksDB-backed history archive

use super::{HistoryRecord, HistoryStore};
use crate::errors::HistoryError;
use async_trait::async_trait;
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

const HISTORY_PREFIX: &str = "history:round:";

fn history_key(round_address: &str) -> Vec<u8> {
    format!("{}{}", HISTORY_PREFIX, round_address).into_bytes()
}

#[derive(Clone)]
pub struct RocksHistoryStore {
    db: Arc<DB>,
    /// Serializes exists-then-put so inserts stay unique within the process
    write_lock: Arc<Mutex<()>>,
}

impl RocksHistoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HistoryError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())?;
        info!("Opened history store at {}", path.as_ref().display());

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open read-only, for inspection tools running next to a live coordinator
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self, HistoryError> {
        let opts = Options::default();
        let db = DB::open_for_read_only(&opts, path, false)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Synchronous lookup
    pub fn load(&self, round_address: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        let Some(bytes) = self.db.get(history_key(round_address))? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| HistoryError::Backend(format!("Failed to decode history for {}: {}", round_address, e)))
    }

    /// Every archived round address, in key order
    pub fn round_addresses(&self) -> Result<Vec<String>, HistoryError> {
        let mut addresses = Vec::new();
        for item in self.db.prefix_iterator(HISTORY_PREFIX.as_bytes()) {
            let (key, _) = item?;
            if !key.starts_with(HISTORY_PREFIX.as_bytes()) {
                break;
            }
            addresses.push(String::from_utf8_lossy(&key[HISTORY_PREFIX.len()..]).into_owned());
        }
        Ok(addresses)
    }

    fn insert_blocking(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let key = history_key(record.round_address());
        let bytes = serde_json::to_vec(record).map_err(|e| {
            HistoryError::Backend(format!("Failed to encode history for {}: {}", record.round_address(), e))
        })?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| HistoryError::Backend("history write lock poisoned".to_string()))?;

        if self.db.get_pinned(&key)?.is_some() {
            return Err(HistoryError::AlreadyExists(record.round_address().to_string()));
        }
        self.db.put(&key, bytes)?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for RocksHistoryStore {
    async fn exists(&self, round_address: &str) -> Result<bool, HistoryError> {
        let db = self.db.clone();
        let key = history_key(round_address);
        run_blocking(move || Ok(db.get_pinned(&key)?.is_some())).await
    }

    async fn insert(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        let store = self.clone();
        run_blocking(move || store.insert_blocking(&record)).await
    }

    async fn get(&self, round_address: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        let store = self.clone();
        let round_address = round_address.to_string();
        run_blocking(move || store.load(&round_address)).await
    }
}

/// RocksDB calls block; keep them off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T, HistoryError>
where
    F: FnOnce() -> Result<T, HistoryError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| HistoryError::Backend(format!("history task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::super::test_support::resolved_round;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_insert_is_unique_and_durable() {
        let temp_dir = TempDir::new().unwrap();
        let (round, outcome) = resolved_round("round-9");

        {
            let store = RocksHistoryStore::open(temp_dir.path()).unwrap();
            assert!(!store.exists("round-9").await.unwrap());

            store.insert(HistoryRecord::from_resolution(&round, &outcome)).await.unwrap();
            let duplicate = store.insert(HistoryRecord::from_resolution(&round, &outcome)).await;
            assert!(matches!(duplicate, Err(HistoryError::AlreadyExists(_))));
        }

        let reopened = RocksHistoryStore::open(temp_dir.path()).unwrap();
        let record = reopened.load("round-9").unwrap().expect("record survives reopen");
        assert_eq!(record.outcome.winner_identity, "bob");
        assert_eq!(reopened.round_addresses().unwrap(), vec!["round-9".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_trait_reads_see_inserted_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksHistoryStore::open(temp_dir.path()).unwrap();
        let (round, outcome) = resolved_round("round-4");
        store.insert(HistoryRecord::from_resolution(&round, &outcome)).await.unwrap();

        let (exists, record) = tokio::join!(store.exists("round-4"), store.get("round-4"));
        assert!(exists.unwrap());
        assert_eq!(record.unwrap().unwrap().round_address(), "round-4");
        assert!(!store.exists("round-5").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_round_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksHistoryStore::open(temp_dir.path()).unwrap();

        assert!(store.get("nope").await.unwrap().is_none());
    }
}

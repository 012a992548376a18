//! Embedded cache adapter.
//!
//! The core talks to caching through the [`CacheAdapter`] trait; [`SledCache`]
//! is the one embedded implementation, backing local development and tests.
//! TTL is not a native `sled` concept, so entries carry an explicit expiry
//! timestamp and are evicted lazily on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resonate_errors::CacheError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[async_trait]
pub trait CacheAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Delete every key under `prefix`. Returns the number of keys removed.
    async fn scan_delete(&self, prefix: &str) -> Result<usize, CacheError>;
    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    expires_at: Option<DateTime<Utc>>,
    value: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct SetValue {
    members: Vec<String>,
}

pub struct SledCache {
    kv: Arc<Mutex<sled::Db>>,
    sets: sled::Tree,
}

impl SledCache {
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let db = sled::open(path)?;
        let sets = db.open_tree("sets")?;
        Ok(Self {
            kv: Arc::new(Mutex::new(db)),
            sets,
        })
    }

    fn read_set(&self, key: &str) -> Result<SetValue, CacheError> {
        match self.sets.get(key.as_bytes())? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(SetValue::default()),
        }
    }

    fn write_set(&self, key: &str, value: &SetValue) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.sets.insert(key.as_bytes(), bytes)?;
        Ok(())
    }
}

#[async_trait]
impl CacheAdapter for SledCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let db = self.kv.lock().await;
        let Some(bytes) = db.get(key.as_bytes())? else {
            return Ok(None);
        };
        let entry: Entry = serde_json::from_slice(&bytes)?;
        if let Some(expires_at) = entry.expires_at {
            if expires_at <= Utc::now() {
                db.remove(key.as_bytes())?;
                return Ok(None);
            }
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|d| {
            Utc::now() + chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
        });
        let entry = Entry {
            expires_at,
            value: value.to_vec(),
        };
        let bytes = serde_json::to_vec(&entry)?;
        let db = self.kv.lock().await;
        db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let db = self.kv.lock().await;
        db.remove(key.as_bytes())?;
        Ok(())
    }

    async fn scan_delete(&self, prefix: &str) -> Result<usize, CacheError> {
        let db = self.kv.lock().await;
        let keys: Vec<Vec<u8>> = db
            .scan_prefix(prefix.as_bytes())
            .filter_map(|res| res.ok().map(|(k, _)| k.to_vec()))
            .collect();
        let count = keys.len();
        for k in keys {
            db.remove(k)?;
        }
        Ok(count)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut set = self.read_set(key)?;
        if !set.members.iter().any(|m| m == member) {
            set.members.push(member.to_string());
            self.write_set(key, &set)?;
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let set = self.read_set(key)?;
        Ok(set.members.iter().any(|m| m == member))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        Ok(self.read_set(key)?.members)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp() -> SledCache {
        let dir = tempfile::tempdir().unwrap();
        SledCache::open(dir.path().to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn get_set_round_trip() {
        let cache = open_tmp();
        cache.set("ers:a:b", b"42", None).await.unwrap();
        assert_eq!(cache.get("ers:a:b").await.unwrap(), Some(b"42".to_vec()));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent() {
        let cache = open_tmp();
        cache
            .set("k", b"v", Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_delete_removes_only_matching_prefix() {
        let cache = open_tmp();
        cache.set("match:1", b"x", None).await.unwrap();
        cache.set("match:2", b"x", None).await.unwrap();
        cache.set("other:1", b"x", None).await.unwrap();
        let removed = cache.scan_delete("match:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get("other:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn set_membership_is_idempotent() {
        let cache = open_tmp();
        cache.sadd("blocked:u1", "u2").await.unwrap();
        cache.sadd("blocked:u1", "u2").await.unwrap();
        let members = cache.smembers("blocked:u1").await.unwrap();
        assert_eq!(members, vec!["u2".to_string()]);
        assert!(cache.sismember("blocked:u1", "u2").await.unwrap());
        assert!(!cache.sismember("blocked:u1", "u3").await.unwrap());
    }
}

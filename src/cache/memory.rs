//! In-process cache backend.
//!
//! Mirrors the Redis semantics the engine relies on closely enough that
//! the coherence tests run hermetically. Expiry is enforced lazily on
//! access.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use super::client::{CacheError, KvCache, TTL_NEVER_EXPIRE};

#[derive(Debug, Clone)]
enum Slot {
    Scalar(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`KvCache`] backend.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| !e.expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of live key names, for assertions in tests.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .iter()
            .filter(|(_, e)| !e.expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    lock_kind = "mutex.lock",
                    result = "poisoned_recovered",
                    "Recovered from poisoned memory cache lock"
                );
                poisoned.into_inner()
            }
        }
    }

    fn prune(map: &mut HashMap<String, Entry>, key: &str) {
        let now = Instant::now();
        if map.get(key).is_some_and(|e| e.expired(now)) {
            map.remove(key);
        }
    }
}

fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut lo = if start < 0 { len + start } else { start };
    let mut hi = if stop < 0 { len + stop } else { stop };
    lo = lo.max(0);
    hi = hi.min(len - 1);
    if lo > hi || len == 0 {
        return None;
    }
    Some((lo as usize, hi as usize))
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get_raw(&self, key: &str) -> Result<String, CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        match map.get(key) {
            Some(Entry {
                slot: Slot::Scalar(value),
                ..
            }) => Ok(value.clone()),
            Some(_) => Err(CacheError::backend("wrong type: key holds a list")),
            None => Err(CacheError::NotFound),
        }
    }

    async fn set_raw(&self, key: &str, value: String, ttl: i64) -> Result<(), CacheError> {
        let expires_at = if ttl == TTL_NEVER_EXPIRE {
            None
        } else {
            Some(Instant::now() + Duration::from_secs(ttl.max(0) as u64))
        };
        self.lock().insert(
            key.to_string(),
            Entry {
                slot: Slot::Scalar(value),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut map = self.lock();
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        Ok(map.contains_key(key))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        match map.get(key) {
            Some(Entry {
                slot: Slot::List(members),
                ..
            }) => {
                let Some((lo, hi)) = normalize_range(members.len(), start, stop) else {
                    return Ok(Vec::new());
                };
                Ok(members.iter().skip(lo).take(hi - lo + 1).cloned().collect())
            }
            Some(_) => Err(CacheError::backend("wrong type: key holds a scalar")),
            // Missing keys yield an empty list, as Redis does.
            None => Ok(Vec::new()),
        }
    }

    async fn lpush(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        let Slot::List(list) = &mut entry.slot else {
            return Err(CacheError::backend("wrong type: key holds a scalar"));
        };
        for member in members {
            list.push_front(member.clone());
        }
        Ok(())
    }

    async fn rpush(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        let entry = map.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        let Slot::List(list) = &mut entry.slot else {
            return Err(CacheError::backend("wrong type: key holds a scalar"));
        };
        for member in members {
            list.push_back(member.clone());
        }
        Ok(())
    }

    async fn lpushx(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        match map.get_mut(key) {
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => {
                list.push_front(member.to_string());
                Ok(())
            }
            Some(_) => Err(CacheError::backend("wrong type: key holds a scalar")),
            None => Ok(()),
        }
    }

    async fn rpushx(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        match map.get_mut(key) {
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => {
                list.push_back(member.to_string());
                Ok(())
            }
            Some(_) => Err(CacheError::backend("wrong type: key holds a scalar")),
            None => Ok(()),
        }
    }

    async fn lpos(&self, key: &str, member: &str) -> Result<Option<i64>, CacheError> {
        let mut map = self.lock();
        Self::prune(&mut map, key);
        match map.get(key) {
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => Ok(list
                .iter()
                .position(|m| m == member)
                .map(|pos| pos as i64)),
            Some(_) => Err(CacheError::backend("wrong type: key holds a scalar")),
            None => Ok(None),
        }
    }
}

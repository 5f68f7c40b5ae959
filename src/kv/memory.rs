//! In-process KV backend.
//!
//! DashMap with lazy expiry on access plus a periodic [`MemoryKv::prune_expired`]
//! sweep. Suitable for single-instance deployments and tests; multi-process
//! deployments use the Redis backend.

use super::{KvError, KvStore};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local [`KvStore`] backend.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries. Called by the background pruning task.
    pub fn prune_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.expired());
        before - self.entries.len()
    }

    /// Read an entry, treating an expired one as absent (and removing it).
    fn live(&self, key: &str) -> Option<Entry> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expired() => true,
            Some(entry) => return Some(entry.clone()),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn with_list<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut VecDeque<String>) -> T,
    ) -> Result<T, KvError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
        if entry.expired() {
            entry.value = Value::List(VecDeque::new());
            entry.expires_at = None;
        }
        match &mut entry.value {
            Value::List(list) => Ok(f(list)),
            // A string key reused as a list resets; matches Redis WRONGTYPE
            // closely enough for a cache.
            value => {
                let mut list = VecDeque::new();
                let result = f(&mut list);
                *value = Value::List(list);
                Ok(result)
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.live(key).and_then(|entry| match entry.value {
            Value::Str(s) => Some(s),
            Value::List(_) => None,
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                if !occupied.get().expired() {
                    return Ok(false);
                }
                occupied.insert(Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl.map(|t| Instant::now() + t),
                });
                Ok(true)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl.map(|t| Instant::now() + t),
                });
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, KvError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: Value::Str("0".to_string()),
                expires_at: None,
            });
        if entry.expired() {
            entry.value = Value::Str("0".to_string());
            entry.expires_at = None;
        }
        let current = match &entry.value {
            Value::Str(s) => s.parse::<i64>().unwrap_or(0),
            Value::List(_) => 0,
        };
        let next = current + by;
        entry.value = Value::Str(next.to_string());
        Ok(next)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.with_list(key, |list| list.push_back(value.to_string()))
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .live(key)
            .map(|entry| match entry.value {
                Value::List(list) => list.into_iter().collect(),
                Value::Str(_) => Vec::new(),
            })
            .unwrap_or_default())
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<bool, KvError> {
        if self.live(key).is_none() {
            return Ok(false);
        }
        self.with_list(key, |list| {
            if let Some(pos) = list.iter().position(|v| v == value) {
                list.remove(pos);
                true
            } else {
                false
            }
        })
    }

    async fn list_len(&self, key: &str) -> Result<u64, KvError> {
        Ok(self
            .live(key)
            .map(|entry| match entry.value {
                Value::List(list) => list.len() as u64,
                Value::Str(_) => 0,
            })
            .unwrap_or(0))
    }

    async fn list_trim_to_newest(&self, key: &str, keep: u64) -> Result<(), KvError> {
        self.with_list(key, |list| {
            while list.len() as u64 > keep {
                list.pop_front();
            }
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

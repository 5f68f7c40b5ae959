//! Broadcast identity records.
//!
//! One record per fanned-out source message, mapping the source id to every
//! sibling message id it produced. A reverse index key per sibling makes the
//! record reachable from any participating id, which is what reply, edit,
//! and delete correlation need. Records age out with the retention TTL.

use crate::error::RelayError;
use crate::kv::{KvStore, keys};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Persisted mapping from one source message to its sibling mirrors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BroadcastRecord {
    pub source_message_id: String,
    pub source_channel_id: String,
    pub hub_id: String,
    pub author_user_id: String,
    /// Milliseconds since the epoch.
    pub created_at: i64,
    /// channel id → mirrored message id. Append-only per source.
    pub broadcasts: BTreeMap<String, String>,
}

/// KV-backed store for broadcast records.
#[derive(Clone)]
pub struct BroadcastLedger {
    kv: Arc<dyn KvStore>,
    retention: Duration,
}

impl BroadcastLedger {
    pub fn new(kv: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self { kv, retention }
    }

    /// Persist a record and its reverse index entries.
    pub async fn insert(&self, record: &BroadcastRecord) -> Result<(), RelayError> {
        let encoded = serde_json::to_string(record).map_err(crate::kv::KvError::from)?;
        self.kv
            .set(
                &keys::broadcast(&record.source_message_id),
                &encoded,
                Some(self.retention),
            )
            .await?;

        for sibling_message_id in record.broadcasts.values() {
            self.kv
                .set(
                    &keys::broadcast_rev(sibling_message_id),
                    &record.source_message_id,
                    Some(self.retention),
                )
                .await?;
        }
        Ok(())
    }

    /// Look up by the source message id.
    pub async fn find_by_source(
        &self,
        source_message_id: &str,
    ) -> Result<Option<BroadcastRecord>, RelayError> {
        let Some(raw) = self.kv.get(&keys::broadcast(source_message_id)).await? else {
            return Ok(None);
        };
        Ok(Some(
            serde_json::from_str(&raw).map_err(crate::kv::KvError::from)?,
        ))
    }

    /// Look up by any participating message id, source or sibling.
    pub async fn find_by_any(
        &self,
        message_id: &str,
    ) -> Result<Option<BroadcastRecord>, RelayError> {
        if let Some(record) = self.find_by_source(message_id).await? {
            return Ok(Some(record));
        }
        let Some(source_id) = self.kv.get(&keys::broadcast_rev(message_id)).await? else {
            return Ok(None);
        };
        self.find_by_source(&source_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryKv;

    fn record() -> BroadcastRecord {
        BroadcastRecord {
            source_message_id: "m-src".into(),
            source_channel_id: "ch-1".into(),
            hub_id: "hub-1".into(),
            author_user_id: "u-1".into(),
            created_at: 1_700_000_000_000,
            broadcasts: BTreeMap::from([
                ("ch-2".to_string(), "m-b".to_string()),
                ("ch-3".to_string(), "m-c".to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn reverse_lookup_matches_source_lookup() {
        let ledger = BroadcastLedger::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));
        ledger.insert(&record()).await.unwrap();

        let by_source = ledger.find_by_source("m-src").await.unwrap().unwrap();
        for sibling in ["m-b", "m-c"] {
            let by_sibling = ledger.find_by_any(sibling).await.unwrap().unwrap();
            assert_eq!(by_sibling, by_source);
        }
        assert_eq!(ledger.find_by_any("m-src").await.unwrap().unwrap(), by_source);
    }

    #[tokio::test]
    async fn unknown_ids_resolve_to_none() {
        let ledger = BroadcastLedger::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));
        assert!(ledger.find_by_any("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_fanout_still_records() {
        let ledger = BroadcastLedger::new(Arc::new(MemoryKv::new()), Duration::from_secs(60));
        let mut rec = record();
        rec.broadcasts.clear();
        ledger.insert(&rec).await.unwrap();
        let loaded = ledger.find_by_source("m-src").await.unwrap().unwrap();
        assert!(loaded.broadcasts.is_empty());
    }
}

//! Redis KV backend.
//!
//! Shared across daemon processes. Uses the connection manager so a dropped
//! connection re-establishes itself without surfacing to callers.

use super::{KvError, KvStore};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

/// Redis-backed [`KvStore`].
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!(url = %url, "Redis connected");
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// Round a TTL up to whole seconds; Redis EX takes seconds and a zero TTL
/// would delete the key instead of bounding it.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.conn().get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn();
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_secs(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.conn().del::<_, ()>(key).await?;
        Ok(())
    }

    async fn incr(&self, key: &str, by: i64) -> Result<i64, KvError> {
        Ok(self.conn().incr::<_, _, i64>(key, by).await?)
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.conn().rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>, KvError> {
        Ok(self.conn().lrange::<_, Vec<String>>(key, 0, -1).await?)
    }

    async fn list_remove(&self, key: &str, value: &str) -> Result<bool, KvError> {
        let removed: i64 = self.conn().lrem(key, 1, value).await?;
        Ok(removed > 0)
    }

    async fn list_len(&self, key: &str) -> Result<u64, KvError> {
        Ok(self.conn().llen::<_, u64>(key).await?)
    }

    async fn list_trim_to_newest(&self, key: &str, keep: u64) -> Result<(), KvError> {
        let start = -(keep.min(i64::MAX as u64) as i64);
        self.conn().ltrim::<_, ()>(key, start as isize, -1).await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
        self.conn()
            .expire::<_, i64>(key, ttl_secs(ttl) as i64)
            .await?;
        Ok(())
    }
}

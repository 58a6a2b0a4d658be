//! Redis cache backend.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::client::{CacheError, KvCache, TTL_NEVER_EXPIRE};

/// Redis-backed [`KvCache`].
///
/// Holds a [`ConnectionManager`], which multiplexes and reconnects on its
/// own; cloning per command is the supported usage pattern.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(CacheError::backend)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(CacheError::backend)?;
        Ok(Self { manager })
    }

    /// Wrap an existing connection manager.
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<String, CacheError> {
        let value: Option<String> = self
            .conn()
            .get(key)
            .await
            .map_err(CacheError::backend)?;
        value.ok_or(CacheError::NotFound)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: i64) -> Result<(), CacheError> {
        let mut conn = self.conn();
        if ttl == TTL_NEVER_EXPIRE {
            let _: () = conn.set(key, value).await.map_err(CacheError::backend)?;
        } else {
            let _: () = conn
                .set_ex(key, value, ttl.max(0) as u64)
                .await
                .map_err(CacheError::backend)?;
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        let _: () = self
            .conn()
            .del(keys)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.conn().exists(key).await.map_err(CacheError::backend)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        self.conn()
            .lrange(key, start as isize, stop as isize)
            .await
            .map_err(CacheError::backend)
    }

    async fn lpush(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let _: () = self
            .conn()
            .lpush(key, members)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn rpush(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let _: () = self
            .conn()
            .rpush(key, members)
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn lpushx(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let _: i64 = redis::cmd("LPUSHX")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn rpushx(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let _: i64 = redis::cmd("RPUSHX")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(CacheError::backend)?;
        Ok(())
    }

    async fn lpos(&self, key: &str, member: &str) -> Result<Option<i64>, CacheError> {
        redis::cmd("LPOS")
            .arg(key)
            .arg(member)
            .query_async(&mut self.conn())
            .await
            .map_err(CacheError::backend)
    }
}

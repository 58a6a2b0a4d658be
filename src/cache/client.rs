//! Cache backend trait and the typed JSON facade over it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// TTL sentinel: the entry never expires.
pub const TTL_NEVER_EXPIRE: i64 = -1;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The key does not exist. Read paths recover from this by falling
    /// back to the database; it is never surfaced to callers as-is.
    #[error("cache key not found")]
    NotFound,

    /// Transport or driver failure.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A stored value did not decode as the expected JSON shape.
    #[error("cache encoding error: {0}")]
    Encoding(String),
}

impl CacheError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn encoding(err: impl std::fmt::Display) -> Self {
        Self::Encoding(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Narrow key-value cache interface the engine depends on.
///
/// Scalar entries traffic in raw strings (the [`CacheClient`] layer owns
/// JSON encoding); list entries traffic in raw member strings. Semantics
/// follow Redis: `lrange` on a missing key yields an empty list, the `-x`
/// push variants only append when the list already exists, and negative
/// `lrange` indices count from the tail.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<String, CacheError>;

    /// `ttl` is seconds; [`TTL_NEVER_EXPIRE`] disables expiry.
    async fn set_raw(&self, key: &str, value: String, ttl: i64) -> Result<(), CacheError>;

    async fn del(&self, keys: &[String]) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError>;

    async fn lpush(&self, key: &str, members: &[String]) -> Result<(), CacheError>;

    async fn rpush(&self, key: &str, members: &[String]) -> Result<(), CacheError>;

    /// Push to the head only when the list already exists.
    async fn lpushx(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Push to the tail only when the list already exists.
    async fn rpushx(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Position of the first matching member, if any.
    async fn lpos(&self, key: &str, member: &str) -> Result<Option<i64>, CacheError>;
}

/// Canonical encoding for list members and skeleton primary keys.
///
/// Compact JSON keeps pushes, `lpos` probes, and id-list reads symmetric
/// for both string and numeric primary keys.
pub fn encode_member(value: &Value) -> String {
    value.to_string()
}

/// Inverse of [`encode_member`]. Unparseable input decodes as a plain
/// string so foreign entries cannot poison a read.
pub fn decode_member(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Thin typed facade over a [`KvCache`] backend.
///
/// Encodes scalar values as JSON on write and decodes on read; everything
/// else passes straight through.
#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn KvCache>,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn KvCache>) -> Self {
        Self { backend }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let raw = self.backend.get_raw(key).await?;
        serde_json::from_str(&raw).map_err(CacheError::encoding)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: i64) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(CacheError::encoding)?;
        self.backend.set_raw(key, raw, ttl).await
    }

    pub async fn del(&self, keys: &[String]) -> Result<(), CacheError> {
        self.backend.del(keys).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, CacheError> {
        self.backend.lrange(key, start, stop).await
    }

    pub async fn lpush(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        self.backend.lpush(key, members).await
    }

    pub async fn rpush(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        self.backend.rpush(key, members).await
    }

    pub async fn lpushx(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.backend.lpushx(key, member).await
    }

    pub async fn rpushx(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.backend.rpushx(key, member).await
    }

    pub async fn lpos(&self, key: &str, member: &str) -> Result<Option<i64>, CacheError> {
        self.backend.lpos(key, member).await
    }
}

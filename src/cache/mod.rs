//! Key-value cache facade.
//!
//! The engine talks to the cache through the [`KvCache`] trait, a narrow
//! slice of Redis semantics (GET/SET/DEL/EXISTS plus the list operations
//! the id-list representation needs). Two backends ship with the crate:
//!
//! - [`RedisCache`]: the production backend over a Redis connection.
//! - [`MemoryCache`]: an in-process backend with the same semantics, used
//!   by the hermetic tests and handy for local development.
//!
//! [`CacheClient`] layers JSON value encoding and TTL handling on top of
//! whichever backend is configured.

mod client;
mod memory;
mod redis;

pub use client::{
    decode_member, encode_member, CacheClient, CacheError, KvCache, TTL_NEVER_EXPIRE,
};
pub use memory::MemoryCache;
pub use redis::RedisCache;

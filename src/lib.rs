//! Declarative read-through / write-through storage.
//!
//! `strato` sits between application code and a Postgres database backed
//! by a key-value cache. Applications declare, per entity type, a set of
//! named queries and, for each query, how the cache reacts to inserts,
//! updates, selects, and deletes. The engine keeps the cache coherent
//! automatically: reads are satisfied from the cache when possible and
//! fall back to the database; writes mutate every cache entry that could
//! be affected, following the declared per-query policies.
//!
//! # Model
//!
//! - A [`Table`] binds one [`Entity`] type to its SQL insert/update
//!   statements and its queries.
//! - A [`Query`] bundles parameterized SQL, a cache-key template, a TTL,
//!   and one [`CacheAction`] per operation.
//! - Single-row queries cache full rows under a *scalar key*. List
//!   queries cache an id-list under the scalar key plus materialized
//!   slices under *list keys*, indexed by a *metadata key* so one write
//!   can invalidate every slice.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde::{Deserialize, Serialize};
//! use strato::{
//!     CacheAction, Config, Entity, PgHandle, Prototype, Query, RedisCache, SelectOptions,
//!     Storage, Table,
//! };
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Lead {
//!     lead_id: i64,
//!     user_id: i64,
//!     name: String,
//! }
//!
//! impl Entity for Lead {
//!     fn entity_name() -> &'static str {
//!         "Lead"
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = sqlx::postgres::PgPoolOptions::new()
//!     .connect("postgres://localhost/app")
//!     .await?;
//! let handle = Arc::new(PgHandle::new(pool));
//!
//! let storage = Storage::new(Config::new(
//!     handle.clone(),
//!     handle,
//!     Arc::new(RedisCache::connect("redis://localhost").await?),
//!     "leads",
//!     vec![Table {
//!         entity: Prototype::of::<Lead>()?,
//!         primary_key_field: "lead_id".to_string(),
//!         primary_query: "LeadsGetByID".to_string(),
//!         insert_sql: "insert into leads (user_id, name) values (:user_id, :name) \
//!                      returning *"
//!             .to_string(),
//!         update_sql: "update leads set name=:name where lead_id=:lead_id returning *"
//!             .to_string(),
//!         queries: vec![
//!             Query {
//!                 name: "LeadsGetByID".to_string(),
//!                 sql: "select * from leads where lead_id=:lead_id".to_string(),
//!                 cache_key: "lead_id=%v".to_string(),
//!                 insert_action: CacheAction::Set,
//!                 update_action: CacheAction::Set,
//!                 select_action: CacheAction::Set,
//!                 ..Default::default()
//!             },
//!             Query {
//!                 name: "LeadsGetByUserID".to_string(),
//!                 sql: "select * from leads where user_id=:user_id".to_string(),
//!                 cache_key: "user_id=%v".to_string(),
//!                 primary_query_stored: Some("LeadsGetByID".to_string()),
//!                 insert_action: CacheAction::RPush,
//!                 select_action: CacheAction::RPush,
//!                 ..Default::default()
//!             },
//!         ],
//!         referenced_queries: vec![],
//!     }],
//! ))?;
//!
//! let mut lead = Lead {
//!     user_id: 7,
//!     name: "Ada".to_string(),
//!     ..Default::default()
//! };
//! storage.insert(&mut lead).await?;
//!
//! let mut leads = Vec::new();
//! storage
//!     .select_all(
//!         &Lead {
//!             user_id: 7,
//!             ..Default::default()
//!         },
//!         &mut leads,
//!         "LeadsGetByUserID",
//!         SelectOptions {
//!             fetch_all_data: true,
//!             ..Default::default()
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod entity;
pub mod error;
pub mod model;

pub use cache::{CacheClient, CacheError, KvCache, MemoryCache, RedisCache, TTL_NEVER_EXPIRE};
pub use config::{Config, DEFAULT_TTL_SECONDS};
pub use db::{DbError, PgHandle, SqlHandle, SqlTransaction, SqlWriteHandle};
pub use engine::{Storage, Tx};
pub use entity::{Entity, FieldMap, Prototype};
pub use error::StorageError;
pub use model::{CacheAction, Query, SelectOptions, Table};

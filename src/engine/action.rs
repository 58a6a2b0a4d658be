//! Action engine: per-query cache effects after database mutations.
//!
//! Every insert, update, and delete walks the entity's queries (own and
//! referenced) and applies each one's declared policy. Failures are
//! logged and the walk continues; one broken key must not strand the
//! rest of the cache in a stale state.

use tracing::{debug, warn};

use crate::cache::{encode_member, CacheError};
use crate::entity::{self, FieldMap};
use crate::error::StorageError;
use crate::model::{CacheAction, ParsedQuery, SelectOptions};

use super::Storage;

/// The database mutation driving a round of cache actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteAction {
    Insert,
    Update,
    Delete,
}

impl Storage {
    /// Apply the per-query cache policies for one mutated row.
    ///
    /// Best effort: per-query failures are logged and the loop continues;
    /// the last error is returned once every query has been attempted.
    pub(crate) async fn apply_write_actions(
        &self,
        map: &FieldMap,
        action: WriteAction,
    ) -> Result<(), StorageError> {
        if self.inner.disable_cache {
            return Ok(());
        }

        let entity_name = entity::type_tag(map)?;
        let table = self.table(entity_name)?;

        let mut last_err = None;
        let query_names = table
            .query_names
            .iter()
            .chain(table.referenced_queries.iter());

        for name in query_names {
            let query = self.query(name)?;

            // A row matching an inequality literal cannot belong to this
            // query's result, so its keys stay untouched.
            if !query.matches(map) {
                if self.inner.debug {
                    debug!(query = %query.name, "row excluded by inequality predicate, skipping");
                }
                continue;
            }

            // Any write invalidates the directory of cached list slices
            // before the id-list itself is touched, so readers never see
            // a fresh slice under a stale directory.
            if query.is_list() {
                if let Err(err) = self.invalidate_cached_select_all(&query, map).await {
                    warn!(
                        error = %err,
                        query = %query.name,
                        "failed to invalidate cached list slices"
                    );
                    last_err = Some(err.into());
                }
            }

            let cache_action = match action {
                WriteAction::Insert => query.insert_action,
                WriteAction::Update => query.update_action,
                WriteAction::Delete => CacheAction::Del,
            };

            if let Err(err) = self.apply_one_action(&query, map, cache_action).await {
                warn!(
                    error = %err,
                    query = %query.name,
                    action = ?cache_action,
                    "cache action failed"
                );
                last_err = Some(err);
            }
        }

        last_err.map_or(Ok(()), Err)
    }

    async fn apply_one_action(
        &self,
        query: &ParsedQuery,
        map: &FieldMap,
        action: CacheAction,
    ) -> Result<(), StorageError> {
        let key = query.key_name(map);
        if self.inner.debug {
            debug!(key, query = %query.name, action = ?action, "applying cache action");
        }

        match action {
            CacheAction::None => Ok(()),
            CacheAction::Set => Ok(self.inner.cache.set(&key, map, query.ttl).await?),
            CacheAction::Del => Ok(self
                .inner
                .cache
                .del(std::slice::from_ref(&key))
                .await?),
            // Writes use the -x push variants: a list that is not cached
            // yet must not partially materialize from a single row.
            CacheAction::LPush => {
                let member = self.primary_member(query, map)?;
                Ok(self.inner.cache.lpushx(&key, &member).await?)
            }
            CacheAction::RPush => {
                let member = self.primary_member(query, map)?;
                Ok(self.inner.cache.rpushx(&key, &member).await?)
            }
        }
    }

    /// Apply the query's select action with freshly fetched rows.
    ///
    /// `Set` caches the merged row; list pushes rebuild the id-list from
    /// every fetched row's primary key, using the unconditional push
    /// variants because the select result is the authoritative list.
    pub(crate) async fn apply_select_action(
        &self,
        map: &FieldMap,
        rows: &[FieldMap],
        query: &ParsedQuery,
    ) -> Result<(), StorageError> {
        if self.inner.disable_cache {
            return Ok(());
        }

        let key = query.key_name(map);
        match query.select_action {
            CacheAction::None => Ok(()),
            CacheAction::Set => Ok(self.inner.cache.set(&key, map, query.ttl).await?),
            CacheAction::Del => Ok(self
                .inner
                .cache
                .del(std::slice::from_ref(&key))
                .await?),
            CacheAction::LPush | CacheAction::RPush => {
                let (_, primary_key_field) = self.stored_primary(query)?;
                let members: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        row.get(&primary_key_field).map(encode_member).ok_or_else(|| {
                            StorageError::contract(format!(
                                "row is missing primary key field `{primary_key_field}`"
                            ))
                        })
                    })
                    .collect::<Result<_, _>>()?;
                if members.is_empty() {
                    return Ok(());
                }
                if self.inner.debug {
                    debug!(key, query = %query.name, count = members.len(), "caching id-list");
                }
                if query.select_action == CacheAction::LPush {
                    Ok(self.inner.cache.lpush(&key, &members).await?)
                } else {
                    Ok(self.inner.cache.rpush(&key, &members).await?)
                }
            }
        }
    }

    /// The encoded primary-key member a list push stores for this row.
    fn primary_member(
        &self,
        query: &ParsedQuery,
        map: &FieldMap,
    ) -> Result<String, StorageError> {
        let (_, primary_key_field) = self.stored_primary(query)?;
        let value = map.get(&primary_key_field).ok_or_else(|| {
            StorageError::contract(format!(
                "row is missing primary key field `{primary_key_field}`"
            ))
        })?;
        Ok(encode_member(value))
    }

    /// Store one materialized list slice and register it in the
    /// metadata directory. Idempotent: a slice key appears in the
    /// directory exactly once no matter how often it is stored.
    pub(crate) async fn set_cached_select_all(
        &self,
        query: &ParsedQuery,
        base: &FieldMap,
        rows: &[FieldMap],
        opts: &SelectOptions,
    ) -> Result<(), CacheError> {
        let list_key = query.list_key_name(base, opts);
        let metadata_key = query.metadata_key_name(base);

        self.inner.cache.set(&list_key, &rows, query.ttl).await?;

        if !self.inner.cache.exists(&metadata_key).await? {
            self.inner
                .cache
                .rpush(&metadata_key, std::slice::from_ref(&list_key))
                .await
        } else if self
            .inner
            .cache
            .lpos(&metadata_key, &list_key)
            .await?
            .is_none()
        {
            self.inner
                .cache
                .rpush(&metadata_key, std::slice::from_ref(&list_key))
                .await
        } else {
            Ok(())
        }
    }

    /// Drop every cached slice the metadata directory knows about, plus
    /// the directory itself, in one deletion.
    pub(crate) async fn invalidate_cached_select_all(
        &self,
        query: &ParsedQuery,
        map: &FieldMap,
    ) -> Result<(), CacheError> {
        let metadata_key = query.metadata_key_name(map);
        let mut keys = self.inner.cache.lrange(&metadata_key, 0, -1).await?;
        keys.push(metadata_key);
        self.inner.cache.del(&keys).await
    }
}

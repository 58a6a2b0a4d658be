//! Read path: single-row and list selects.
//!
//! Both operations work at the field-map level; the typed wrappers in
//! the engine module convert entities at the boundary. List selects keep
//! a two-level representation in the cache: an id-list under the query's
//! scalar key, and one full row per id under the primary query's keys.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::cache::decode_member;
use crate::db::SqlHandle;
use crate::entity::{self, FieldMap};
use crate::error::StorageError;
use crate::model::{CacheAction, ParsedQuery, SelectOptions};

use super::Storage;

impl Storage {
    /// Fetch exactly one row through `query_name`, merging the result
    /// into `map`.
    pub(crate) async fn select_one_map<H>(
        &self,
        map: &mut FieldMap,
        query_name: &str,
        handle: &H,
    ) -> Result<(), StorageError>
    where
        H: SqlHandle + ?Sized,
    {
        let query = self.query(query_name)?;

        if !self.inner.disable_cache {
            let key = query.key_name(map);
            match self.inner.cache.get::<FieldMap>(&key).await {
                Ok(cached) => {
                    if self.inner.debug {
                        debug!(key, query = %query.name, "cache hit");
                    }
                    entity::merge(map, &cached);
                    return Ok(());
                }
                Err(err) if err.is_not_found() => {
                    if self.inner.debug {
                        debug!(key, query = %query.name, "cache miss, falling back to database");
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        let sql = query.expand_sql(&query.sql, map)?;
        let rows = handle.fetch(&sql, map).await?;
        if rows.is_empty() {
            return Err(StorageError::NotFound);
        }
        if rows.len() > 1 {
            return Err(StorageError::MultipleRows {
                query: query.name.clone(),
                count: rows.len(),
            });
        }
        entity::merge(map, &rows[0]);

        self.apply_select_action(map, &rows, &query).await?;
        Ok(())
    }

    /// Fetch the rows `query_name` covers for the key values in `base`.
    pub(crate) async fn select_all_rows<H>(
        &self,
        base: &FieldMap,
        query_name: &str,
        opts: &SelectOptions,
        handle: &H,
    ) -> Result<Vec<FieldMap>, StorageError>
    where
        H: SqlHandle + ?Sized,
    {
        opts.validate()?;
        let query = self.query(query_name)?;

        // Queries that never cache their result set go straight to the
        // database, honoring the caller's paging.
        if query.select_action == CacheAction::None || self.inner.disable_cache {
            return self.select_all_uncached(base, &query, opts, handle).await;
        }

        if opts.fetch_all_data {
            match self.cached_select_all(&query, base, opts).await {
                Ok(rows) => return Ok(rows),
                Err(StorageError::NotFound) => {}
                Err(err) => return Err(err),
            }
        }

        // Two passes: a miss populates the id-list from the database,
        // the retry reads it back so the result shape is identical to a
        // warm-cache read.
        let mut db_rows = Vec::new();
        for pass in 0..2 {
            if let Some(rows) = self
                .select_all_from_id_list(base, &query, opts, handle)
                .await?
            {
                return Ok(rows);
            }

            if pass == 0 {
                let sql = query.expand_sql(&query.sql, base)?;
                let rows = handle.fetch(&sql, base).await?;
                if rows.is_empty() {
                    return Err(StorageError::NotFound);
                }
                self.apply_select_action(base, &rows, &query).await?;
                db_rows = rows;
            }
        }

        // The id-list vanished between passes (concurrent invalidation).
        // Serve the requested slice from the rows already fetched.
        debug!(query = %query.name, "id-list missing after repopulation, serving database rows");
        let rows = self.flesh_rows(&query, slice_rows(db_rows, opts))?;
        Ok(rows)
    }

    /// Merge raw database rows onto the owning table's skeleton so every
    /// returned map carries the full field set and both engine tags.
    fn flesh_rows(
        &self,
        query: &ParsedQuery,
        rows: Vec<FieldMap>,
    ) -> Result<Vec<FieldMap>, StorageError> {
        let skeleton = self.table(&query.table)?.skeleton.clone();
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut full = skeleton.clone();
                entity::merge(&mut full, &row);
                full
            })
            .collect())
    }

    /// Read the id-list under the query's scalar key and expand it.
    ///
    /// `Ok(None)` means the list is not cached at all; an empty cached
    /// list is a legitimate empty result.
    pub(crate) async fn select_all_from_id_list<H>(
        &self,
        base: &FieldMap,
        query: &ParsedQuery,
        opts: &SelectOptions,
        handle: &H,
    ) -> Result<Option<Vec<FieldMap>>, StorageError>
    where
        H: SqlHandle + ?Sized,
    {
        let key = query.key_name(base);
        // LRANGE cannot distinguish an empty list from a missing key, so
        // presence is probed separately.
        if !self.inner.cache.exists(&key).await? {
            return Ok(None);
        }

        let members = self
            .inner
            .cache
            .lrange(&key, opts.offset, opts.lrange_stop())
            .await?;

        let (primary, primary_key_field) = self.stored_primary(query)?;
        let skeleton = self.table(&primary.table)?.skeleton.clone();

        let mut rows: Vec<FieldMap> = members
            .iter()
            .map(|member| {
                let mut row = skeleton.clone();
                row.insert(primary_key_field.clone(), decode_member(member));
                row
            })
            .collect();

        if opts.fetch_all_data {
            rows = if self.inner.disable_concurrency {
                let mut fetched = Vec::with_capacity(rows.len());
                for mut row in rows {
                    self.select_one_map(&mut row, &primary.name, handle).await?;
                    fetched.push(row);
                }
                fetched
            } else {
                // Fail-fast fan-out: the first error cancels the rest.
                try_join_all(rows.into_iter().map(|mut row| {
                    let primary_name = primary.name.as_str();
                    async move {
                        self.select_one_map(&mut row, primary_name, handle).await?;
                        Ok::<_, StorageError>(row)
                    }
                }))
                .await?
            };

            if let Err(err) = self.set_cached_select_all(query, base, &rows, opts).await {
                warn!(error = %err, query = %query.name, "failed to store cached list slice");
            }
        }

        Ok(Some(rows))
    }

    /// Raw-SQL list select, bypassing every cache structure.
    async fn select_all_uncached<H>(
        &self,
        base: &FieldMap,
        query: &Arc<ParsedQuery>,
        opts: &SelectOptions,
        handle: &H,
    ) -> Result<Vec<FieldMap>, StorageError>
    where
        H: SqlHandle + ?Sized,
    {
        let mut params = base.clone();
        let sql = if opts.limit > 0 {
            params.insert("limit".to_string(), opts.limit.into());
            params.insert("offset".to_string(), opts.offset.into());
            query.paged_sql(opts.limit)
        } else {
            &query.sql
        };
        let sql = query.expand_sql(sql, &params)?;

        let rows = handle.fetch(&sql, &params).await?;
        if rows.is_empty() {
            return Err(StorageError::NotFound);
        }
        self.flesh_rows(query, rows)
    }

    /// Cached-selectAll fast path.
    ///
    /// The metadata key acts as the directory of every cached slice; when
    /// it is gone, every slice is considered gone with it. A hit triggers
    /// a detached refresh so the slice stays warm without blocking the
    /// caller.
    pub(crate) async fn cached_select_all(
        &self,
        query: &Arc<ParsedQuery>,
        base: &FieldMap,
        opts: &SelectOptions,
    ) -> Result<Vec<FieldMap>, StorageError> {
        let metadata_key = query.metadata_key_name(base);
        if !self.inner.cache.exists(&metadata_key).await? {
            return Err(StorageError::NotFound);
        }

        let list_key = query.list_key_name(base, opts);
        match self.inner.cache.get::<Vec<FieldMap>>(&list_key).await {
            Ok(rows) => {
                if self.inner.debug {
                    debug!(key = %list_key, query = %query.name, "cached list hit");
                }
                self.spawn_list_refresh(query, base, opts);
                Ok(rows)
            }
            Err(err) if err.is_not_found() => Err(StorageError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Fire-and-forget refresh of one cached list slice.
    ///
    /// Runs on its own task root so caller teardown never aborts it.
    fn spawn_list_refresh(&self, query: &Arc<ParsedQuery>, base: &FieldMap, opts: &SelectOptions) {
        let engine = self.clone();
        let query = Arc::clone(query);
        let base = base.clone();
        let opts = SelectOptions {
            fetch_all_data: true,
            ..*opts
        };
        tokio::spawn(async move {
            let handle = Arc::clone(&engine.inner.read);
            match engine
                .select_all_from_id_list(&base, &query, &opts, handle.as_ref())
                .await
            {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(query = %query.name, "list refresh skipped, id-list no longer cached");
                }
                Err(err) => {
                    debug!(error = %err, query = %query.name, "background list refresh failed");
                }
            }
        });
    }
}

fn slice_rows(rows: Vec<FieldMap>, opts: &SelectOptions) -> Vec<FieldMap> {
    let iter = rows.into_iter().skip(opts.offset.max(0) as usize);
    if opts.limit > 0 {
        iter.take(opts.limit as usize).collect()
    } else {
        iter.collect()
    }
}

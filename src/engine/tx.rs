//! Transactions.
//!
//! A transaction buffers the cache actions its writes would take and
//! replays them only after the database commit succeeds, so the cache
//! never reflects uncommitted state.

use tracing::warn;

use crate::db::SqlTransaction;
use crate::entity::{self, Entity, FieldMap};
use crate::error::StorageError;
use crate::model::SelectOptions;

use super::{Storage, WriteAction};

/// An open transaction.
///
/// `insert`/`update` run their SQL inside the transaction and defer the
/// cache actions. Reads go through the normal read path using the
/// transaction's handle; note they observe committed cache state, not
/// the writes buffered in this transaction.
pub struct Tx {
    engine: Storage,
    handle: Box<dyn SqlTransaction>,
    deferred: Vec<(WriteAction, FieldMap)>,
}

impl Tx {
    pub(crate) fn new(engine: Storage, handle: Box<dyn SqlTransaction>) -> Self {
        Self {
            engine,
            handle,
            deferred: Vec::new(),
        }
    }

    /// Insert inside the transaction; the cache action is deferred to
    /// [`Tx::end`].
    pub async fn insert<E: Entity>(&mut self, entity: &mut E) -> Result<(), StorageError> {
        let mut map = self.engine.tagged_map(entity)?;
        self.engine
            .insert_row(&mut map, self.handle.as_ref())
            .await?;
        *entity = entity::from_map(map.clone())?;
        self.deferred.push((WriteAction::Insert, map));
        Ok(())
    }

    /// Update inside the transaction; the cache action is deferred to
    /// [`Tx::end`].
    pub async fn update<E: Entity>(&mut self, entity: &mut E) -> Result<(), StorageError> {
        let mut map = self.engine.tagged_map(entity)?;
        self.engine
            .update_row(&mut map, self.handle.as_ref())
            .await?;
        *entity = entity::from_map(map.clone())?;
        self.deferred.push((WriteAction::Update, map));
        Ok(())
    }

    /// Single-row select through the transaction's handle.
    pub async fn select<E: Entity>(
        &self,
        entity: &mut E,
        query_name: &str,
    ) -> Result<(), StorageError> {
        let mut map = self.engine.tagged_map(entity)?;
        self.engine
            .select_one_map(&mut map, query_name, self.handle.as_ref())
            .await?;
        *entity = entity::from_map(map)?;
        Ok(())
    }

    /// List select through the transaction's handle.
    pub async fn select_all<E: Entity>(
        &self,
        entity: &E,
        dest: &mut Vec<E>,
        query_name: &str,
        opts: SelectOptions,
    ) -> Result<(), StorageError> {
        let map = self.engine.tagged_map(entity)?;
        let rows = self
            .engine
            .select_all_rows(&map, query_name, &opts, self.handle.as_ref())
            .await?;
        *dest = entity::from_maps(rows)?;
        Ok(())
    }

    /// Commit, then replay the deferred cache actions.
    ///
    /// A commit failure rolls the transaction back (the driver discards
    /// it) and no cache action runs. Replay failures are logged per
    /// query by the action engine; the last one is returned after every
    /// record has been attempted.
    pub async fn end(self) -> Result<(), StorageError> {
        let Tx {
            engine,
            handle,
            deferred,
        } = self;

        handle.commit().await?;

        let mut last_err = None;
        for (action, map) in deferred {
            if let Err(err) = engine.apply_write_actions(&map, action).await {
                last_err = Some(err);
            }
        }
        if last_err.is_some() {
            warn!("one or more deferred cache actions failed after commit");
        }
        last_err.map_or(Ok(()), Err)
    }

    /// Roll back and discard the deferred actions.
    pub async fn rollback(self) -> Result<(), StorageError> {
        self.handle.rollback().await?;
        Ok(())
    }
}

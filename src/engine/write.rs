//! Write path: inserts and updates through `RETURNING *`.

use crate::db::SqlHandle;
use crate::entity::{self, FieldMap};
use crate::error::StorageError;

use super::{Storage, WriteAction};

impl Storage {
    /// Run the table's insert statement and merge the returned row back
    /// into the map, rehydrating generated fields.
    pub(crate) async fn insert_row<H>(
        &self,
        map: &mut FieldMap,
        handle: &H,
    ) -> Result<(), StorageError>
    where
        H: SqlHandle + ?Sized,
    {
        let entity_name = entity::type_tag(map)?.to_string();
        let sql = {
            let table = self.table(&entity_name)?;
            if table.insert_sql.is_empty() {
                return Err(StorageError::contract(format!(
                    "table `{entity_name}` has no insert statement"
                )));
            }
            table.insert_sql.clone()
        };
        self.write_row(map, &sql, handle, "insert", &entity_name).await
    }

    /// Run the table's update statement; same merge semantics as insert.
    pub(crate) async fn update_row<H>(
        &self,
        map: &mut FieldMap,
        handle: &H,
    ) -> Result<(), StorageError>
    where
        H: SqlHandle + ?Sized,
    {
        let entity_name = entity::type_tag(map)?.to_string();
        let sql = {
            let table = self.table(&entity_name)?;
            if table.update_sql.is_empty() {
                return Err(StorageError::contract(format!(
                    "table `{entity_name}` has no update statement"
                )));
            }
            table.update_sql.clone()
        };
        self.write_row(map, &sql, handle, "update", &entity_name).await
    }

    async fn write_row<H>(
        &self,
        map: &mut FieldMap,
        sql: &str,
        handle: &H,
        op: &'static str,
        entity_name: &str,
    ) -> Result<(), StorageError>
    where
        H: SqlHandle + ?Sized,
    {
        let rows = handle.fetch(sql, map).await?;
        if rows.len() != 1 {
            return Err(StorageError::contract(format!(
                "{op} on `{entity_name}` returned {} rows where exactly one was expected",
                rows.len()
            )));
        }
        // The caller's map may carry fields the statement does not
        // return; keep them and overwrite the rest.
        entity::merge(map, &rows[0]);
        Ok(())
    }

    /// Apply delete actions for one row. Cache only.
    pub(crate) async fn delete_map(&self, map: &FieldMap) -> Result<(), StorageError> {
        self.apply_write_actions(map, WriteAction::Delete).await
    }
}

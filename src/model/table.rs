//! Table declarations and their parsed runtime form.

use crate::entity::{FieldMap, Prototype, PRIMARY_KEY_TAG};
use crate::error::StorageError;
use crate::model::Query;

use serde_json::Value;

/// Declarative table definition, binding one entity type to its queries.
///
/// `referenced_queries` names queries declared on *other* tables that must
/// react to writes on this one. The canonical case is a relation table
/// whose inserts extend an id-list owned by a joined entity's query.
#[derive(Debug, Clone)]
pub struct Table {
    /// Entity prototype, captured with [`Prototype::of`]. Used only to
    /// enumerate field names and slice-typed columns at construction.
    pub entity: Prototype,

    /// Field name of the primary key, e.g. `lead_id`. Required whenever
    /// the table has an insert statement.
    pub primary_key_field: String,

    /// Name of the unique query that fetches one row by primary key.
    pub primary_query: String,

    /// Insert statement. Must end with `RETURNING *` so generated fields
    /// rehydrate into the entity.
    pub insert_sql: String,

    /// Update statement. Same `RETURNING *` requirement.
    pub update_sql: String,

    /// Queries declared on this table, in declaration order.
    pub queries: Vec<Query>,

    /// Names of queries on other tables affected by writes here.
    pub referenced_queries: Vec<String>,
}

fn ends_with_returning_all(sql: &str) -> bool {
    sql.trim_end().to_ascii_lowercase().ends_with("returning *")
}

/// A validated table with its startup-derived skeleton.
#[derive(Debug)]
pub(crate) struct ParsedTable {
    pub entity_name: String,
    /// Prototype fields plus both engine tags; cloned to synthesize
    /// skeleton rows during list expansion.
    pub skeleton: FieldMap,
    pub primary_key_field: String,
    pub primary_query: String,
    pub insert_sql: String,
    pub update_sql: String,
    /// Own query names in declaration order.
    pub query_names: Vec<String>,
    pub referenced_queries: Vec<String>,
    /// Prototype fields whose JSON representation is an array.
    pub slice_fields: Vec<String>,
}

impl ParsedTable {
    pub(crate) fn parse(table: &Table) -> Result<Self, StorageError> {
        let entity_name = table.entity.name().to_string();
        if entity_name.is_empty() {
            return Err(StorageError::config("table entity name is required"));
        }
        if table.primary_query.is_empty() {
            return Err(StorageError::config(format!(
                "table `{entity_name}`: primary_query is required"
            )));
        }
        if table.queries.is_empty() {
            return Err(StorageError::config(format!(
                "table `{entity_name}`: at least one query is required"
            )));
        }
        if table.primary_key_field.is_empty() && !table.insert_sql.is_empty() {
            return Err(StorageError::config(format!(
                "table `{entity_name}`: primary_key_field is required for insertable tables"
            )));
        }
        if !table.insert_sql.is_empty() && !ends_with_returning_all(&table.insert_sql) {
            return Err(StorageError::config(format!(
                "table `{entity_name}`: insert_sql must end with RETURNING *"
            )));
        }
        if !table.update_sql.is_empty() && !ends_with_returning_all(&table.update_sql) {
            return Err(StorageError::config(format!(
                "table `{entity_name}`: update_sql must end with RETURNING *"
            )));
        }

        let mut skeleton = table.entity.fields().clone();
        skeleton.insert(
            PRIMARY_KEY_TAG.to_string(),
            Value::String(table.primary_key_field.clone()),
        );

        Ok(Self {
            entity_name,
            skeleton,
            primary_key_field: table.primary_key_field.clone(),
            primary_query: table.primary_query.clone(),
            insert_sql: table.insert_sql.clone(),
            update_sql: table.update_sql.clone(),
            query_names: table.queries.iter().map(|q| q.name.clone()).collect(),
            referenced_queries: table.referenced_queries.clone(),
            slice_fields: table.entity.slice_fields(),
        })
    }
}

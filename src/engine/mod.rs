//! The coherence engine.
//!
//! [`Storage`] owns the parsed query/table metadata and the external
//! handles, and exposes the public read/write/transaction API. Metadata
//! is validated once in [`Storage::new`] and immutable afterwards, so the
//! handle clones freely across tasks.

mod action;
mod read;
mod tx;
mod write;

pub use tx::Tx;

pub(crate) use action::WriteAction;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use crate::cache::CacheClient;
use crate::config::{Config, DEFAULT_TTL_SECONDS};
use crate::db::{SqlHandle, SqlWriteHandle};
use crate::entity::{self, Entity, FieldMap, PRIMARY_KEY_TAG};
use crate::error::StorageError;
use crate::model::{ParsedQuery, ParsedTable, SelectOptions};

pub(crate) struct StorageInner {
    pub(crate) cache: CacheClient,
    pub(crate) read: Arc<dyn SqlHandle>,
    pub(crate) write: Arc<dyn SqlWriteHandle>,
    pub(crate) tables: HashMap<String, ParsedTable>,
    pub(crate) queries: HashMap<String, Arc<ParsedQuery>>,
    pub(crate) debug: bool,
    pub(crate) disable_cache: bool,
    pub(crate) disable_concurrency: bool,
}

/// Declarative read-through / write-through storage engine.
///
/// Cheap to clone; all clones share the same metadata and handles.
#[derive(Clone)]
pub struct Storage {
    pub(crate) inner: Arc<StorageInner>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Validate the declarations and construct the engine.
    ///
    /// Every declaration problem surfaces here as
    /// [`StorageError::Config`]; nothing is validated lazily on the hot
    /// paths.
    pub fn new(config: Config) -> Result<Self, StorageError> {
        if config.service_name.is_empty() {
            return Err(StorageError::config("service_name is required"));
        }
        let default_ttl = if config.default_ttl == 0 {
            DEFAULT_TTL_SECONDS
        } else {
            config.default_ttl
        };

        let mut tables: HashMap<String, ParsedTable> = HashMap::new();
        let mut queries: HashMap<String, Arc<ParsedQuery>> = HashMap::new();

        for table in &config.tables {
            let parsed = ParsedTable::parse(table)?;
            let entity_name = parsed.entity_name.clone();
            if tables.contains_key(&entity_name) {
                return Err(StorageError::config(format!(
                    "duplicate table for entity `{entity_name}`"
                )));
            }

            for query in &table.queries {
                if queries.contains_key(&query.name) {
                    return Err(StorageError::config(format!(
                        "duplicate query name `{}`; query names are global",
                        query.name
                    )));
                }
                let parsed_query = ParsedQuery::parse(
                    query,
                    &config.service_name,
                    &entity_name,
                    &parsed.slice_fields,
                    default_ttl,
                )?;
                queries.insert(query.name.clone(), Arc::new(parsed_query));
            }

            tables.insert(entity_name, parsed);
        }

        validate_cross_references(&tables, &queries)?;

        Ok(Self {
            inner: Arc::new(StorageInner {
                cache: CacheClient::new(config.cache),
                read: config.read_handle,
                write: config.write_handle,
                tables,
                queries,
                debug: config.debug,
                disable_cache: config.disable_cache,
                disable_concurrency: config.disable_concurrency,
            }),
        })
    }

    /// Insert the entity and apply every insert action its table's
    /// queries declare. The entity is rehydrated from the returned row.
    #[instrument(skip_all, fields(entity = E::entity_name()))]
    pub async fn insert<E: Entity>(&self, entity: &mut E) -> Result<(), StorageError> {
        let mut map = self.tagged_map(entity)?;
        self.insert_row(&mut map, self.inner.write.as_ref()).await?;
        self.apply_write_actions(&map, WriteAction::Insert).await?;
        *entity = entity::from_map(map)?;
        Ok(())
    }

    /// Update the entity and apply every update action. The entity is
    /// rehydrated from the returned row.
    #[instrument(skip_all, fields(entity = E::entity_name()))]
    pub async fn update<E: Entity>(&self, entity: &mut E) -> Result<(), StorageError> {
        let mut map = self.tagged_map(entity)?;
        self.update_row(&mut map, self.inner.write.as_ref()).await?;
        self.apply_write_actions(&map, WriteAction::Update).await?;
        *entity = entity::from_map(map)?;
        Ok(())
    }

    /// Fetch a single row through the named query, filling the entity in
    /// place. Cache first, database on miss.
    #[instrument(skip_all, fields(query = query_name))]
    pub async fn select<E: Entity>(
        &self,
        entity: &mut E,
        query_name: &str,
    ) -> Result<(), StorageError> {
        let mut map = self.tagged_map(entity)?;
        self.select_one_map(&mut map, query_name, self.inner.read.as_ref())
            .await?;
        *entity = entity::from_map(map)?;
        Ok(())
    }

    /// Fetch a list of rows through the named query.
    ///
    /// `entity` supplies the key parameters; results land in `dest`.
    /// Without `fetch_all_data` the rows are skeletons carrying only the
    /// primary key.
    #[instrument(skip_all, fields(query = query_name))]
    pub async fn select_all<E: Entity>(
        &self,
        entity: &E,
        dest: &mut Vec<E>,
        query_name: &str,
        opts: SelectOptions,
    ) -> Result<(), StorageError> {
        let map = self.tagged_map(entity)?;
        let rows = self
            .select_all_rows(&map, query_name, &opts, self.inner.read.as_ref())
            .await?;
        *dest = entity::from_maps(rows)?;
        Ok(())
    }

    /// Remove every cache key the entities' tables declare. Cache only;
    /// the database is not touched.
    #[instrument(skip_all, fields(entity = E::entity_name(), count = entities.len()))]
    pub async fn delete_keys<E: Entity>(&self, entities: &[E]) -> Result<(), StorageError> {
        for entity in entities {
            let map = self.tagged_map(entity)?;
            self.delete_map(&map).await?;
        }
        Ok(())
    }

    /// The concrete scalar cache key the named query derives for this
    /// entity. Introspection only.
    pub fn key_name<E: Entity>(
        &self,
        query_name: &str,
        entity: &E,
    ) -> Result<String, StorageError> {
        let map = self.tagged_map(entity)?;
        let query = self.query(query_name)?;
        Ok(query.key_name(&map))
    }

    /// Run `EXPLAIN` for every cached query against the read handle.
    ///
    /// Catches SQL typos at startup instead of on the first live read.
    /// Queries whose actions are all `NoAction` are skipped; their
    /// parameters may be slices the prototype cannot populate.
    pub async fn verify_queries(&self) -> Result<(), StorageError> {
        use crate::model::CacheAction;

        for query in self.inner.queries.values() {
            if query.insert_action == CacheAction::None
                && query.update_action == CacheAction::None
                && query.select_action == CacheAction::None
            {
                continue;
            }

            let table = self.table(&query.table)?;
            let mut params = table.skeleton.clone();
            params.insert("limit".to_string(), Value::from(0));
            params.insert("offset".to_string(), Value::from(0));

            let sql = format!("EXPLAIN {}", query.limit_offset_sql);
            self.inner.read.fetch(&sql, &params).await.map_err(|err| {
                StorageError::config(format!(
                    "query `{}` failed verification: {err}",
                    query.name
                ))
            })?;
        }
        Ok(())
    }

    /// Open a transaction. Writes inside it defer their cache actions
    /// until [`Tx::end`] commits.
    pub async fn begin(&self) -> Result<Tx, StorageError> {
        let handle = self.inner.write.begin().await?;
        Ok(Tx::new(self.clone(), handle))
    }

    /// Convert an entity into its tagged field mapping.
    pub(crate) fn tagged_map<E: Entity>(&self, entity: &E) -> Result<FieldMap, StorageError> {
        let mut map = entity::to_map(entity)?;
        let table = self.table(E::entity_name())?;
        map.insert(
            PRIMARY_KEY_TAG.to_string(),
            Value::String(table.primary_key_field.clone()),
        );
        Ok(map)
    }

    pub(crate) fn query(&self, name: &str) -> Result<Arc<ParsedQuery>, StorageError> {
        self.inner.queries.get(name).cloned().ok_or_else(|| {
            StorageError::contract(format!(
                "unknown query `{name}`; is its table configured?"
            ))
        })
    }

    pub(crate) fn table(&self, entity_name: &str) -> Result<&ParsedTable, StorageError> {
        self.inner.tables.get(entity_name).ok_or_else(|| {
            StorageError::contract(format!("no table configured for entity `{entity_name}`"))
        })
    }

    /// The primary query an id-list stores references to, plus the
    /// primary-key field those references name.
    pub(crate) fn stored_primary(
        &self,
        query: &ParsedQuery,
    ) -> Result<(Arc<ParsedQuery>, String), StorageError> {
        let stored = query.primary_query_stored.as_deref().ok_or_else(|| {
            StorageError::contract(format!(
                "query `{}` has no primary_query_stored",
                query.name
            ))
        })?;
        let primary = self.query(stored)?;
        let primary_key_field = self.table(&primary.table)?.primary_key_field.clone();
        Ok((primary, primary_key_field))
    }
}

fn validate_cross_references(
    tables: &HashMap<String, ParsedTable>,
    queries: &HashMap<String, Arc<ParsedQuery>>,
) -> Result<(), StorageError> {
    for table in tables.values() {
        // The primary query must be one of the table's own queries and,
        // for insertable tables, keyed by exactly the primary-key field.
        let primary = queries.get(&table.primary_query).ok_or_else(|| {
            StorageError::config(format!(
                "table `{}`: primary query `{}` is not declared",
                table.entity_name, table.primary_query
            ))
        })?;
        if primary.table != table.entity_name {
            return Err(StorageError::config(format!(
                "table `{}`: primary query `{}` belongs to table `{}`",
                table.entity_name, table.primary_query, primary.table
            )));
        }
        if !table.primary_key_field.is_empty() {
            let eq_columns: Vec<&str> = primary.template.eq_columns().collect();
            if eq_columns != vec![table.primary_key_field.as_str()] {
                return Err(StorageError::config(format!(
                    "table `{}`: primary query `{}` must be keyed by `{}=%v` alone",
                    table.entity_name, table.primary_query, table.primary_key_field
                )));
            }
        }

        for referenced in &table.referenced_queries {
            if !queries.contains_key(referenced) {
                return Err(StorageError::config(format!(
                    "table `{}`: referenced query `{referenced}` is not declared",
                    table.entity_name
                )));
            }
        }
    }

    // List queries must point at a real primary query.
    for query in queries.values() {
        if !query.is_list() {
            continue;
        }
        let Some(stored) = query.primary_query_stored.as_deref() else {
            return Err(StorageError::config(format!(
                "query `{}`: list actions require primary_query_stored",
                query.name
            )));
        };
        let Some(target) = queries.get(stored) else {
            return Err(StorageError::config(format!(
                "query `{}`: primary_query_stored `{stored}` is not declared",
                query.name
            )));
        };
        let Some(owner) = tables.get(&target.table) else {
            return Err(StorageError::config(format!(
                "query `{}`: table `{}` is not declared",
                target.name, target.table
            )));
        };
        if owner.primary_query != stored {
            return Err(StorageError::config(format!(
                "query `{}`: primary_query_stored `{stored}` is not the primary query of table `{}`",
                query.name, target.table
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::DbError;
    use crate::entity::Prototype;
    use crate::model::{CacheAction, Query, Table};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Lead {
        lead_id: i64,
        user_id: i64,
        name: String,
    }

    impl Entity for Lead {
        fn entity_name() -> &'static str {
            "Lead"
        }
    }

    struct NoopDb;

    #[async_trait::async_trait]
    impl SqlHandle for NoopDb {
        async fn fetch(&self, _sql: &str, _params: &FieldMap) -> Result<Vec<FieldMap>, DbError> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl SqlWriteHandle for NoopDb {
        async fn begin(&self) -> Result<Box<dyn crate::db::SqlTransaction>, DbError> {
            Err(DbError::backend("transactions unsupported"))
        }
    }

    fn primary_query() -> Query {
        Query {
            name: "LeadsGetByID".to_string(),
            sql: "select * from leads where lead_id=:lead_id".to_string(),
            cache_key: "lead_id=%v".to_string(),
            insert_action: CacheAction::Set,
            update_action: CacheAction::Set,
            select_action: CacheAction::Set,
            ..Default::default()
        }
    }

    fn list_query() -> Query {
        Query {
            name: "LeadsGetByUserID".to_string(),
            sql: "select * from leads where user_id=:user_id".to_string(),
            cache_key: "user_id=%v".to_string(),
            primary_query_stored: Some("LeadsGetByID".to_string()),
            insert_action: CacheAction::RPush,
            update_action: CacheAction::None,
            select_action: CacheAction::RPush,
            ..Default::default()
        }
    }

    fn leads_table(queries: Vec<Query>) -> Table {
        Table {
            entity: Prototype::of::<Lead>().expect("prototype"),
            primary_key_field: "lead_id".to_string(),
            primary_query: "LeadsGetByID".to_string(),
            insert_sql: "insert into leads (user_id, name) values (:user_id, :name) returning *"
                .to_string(),
            update_sql: "update leads set name=:name where lead_id=:lead_id returning *"
                .to_string(),
            queries,
            referenced_queries: vec![],
        }
    }

    fn config(tables: Vec<Table>) -> Config {
        let db = Arc::new(NoopDb);
        Config::new(
            db.clone(),
            db,
            Arc::new(MemoryCache::new()),
            "leads",
            tables,
        )
    }

    #[test]
    fn valid_config_constructs() {
        let storage =
            Storage::new(config(vec![leads_table(vec![primary_query(), list_query()])]));
        assert!(storage.is_ok());
    }

    #[test]
    fn service_name_is_required() {
        let mut cfg = config(vec![leads_table(vec![primary_query()])]);
        cfg.service_name = String::new();
        assert!(matches!(
            Storage::new(cfg),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn duplicate_query_names_are_rejected() {
        let table = leads_table(vec![primary_query(), primary_query()]);
        assert!(matches!(
            Storage::new(config(vec![table])),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn mixed_action_structures_are_rejected() {
        let mut bad = list_query();
        bad.update_action = CacheAction::Set;
        let table = leads_table(vec![primary_query(), bad]);
        assert!(matches!(
            Storage::new(config(vec![table])),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn list_query_without_stored_primary_is_rejected() {
        let mut bad = list_query();
        bad.primary_query_stored = None;
        let table = leads_table(vec![primary_query(), bad]);
        assert!(matches!(
            Storage::new(config(vec![table])),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn stored_primary_must_be_a_primary_query() {
        let mut bad = list_query();
        bad.primary_query_stored = Some("LeadsGetByUserID".to_string());
        let table = leads_table(vec![primary_query(), bad]);
        assert!(matches!(
            Storage::new(config(vec![table])),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn primary_query_template_must_match_primary_key() {
        let mut primary = primary_query();
        primary.cache_key = "user_id=%v".to_string();
        let table = leads_table(vec![primary, list_query()]);
        assert!(matches!(
            Storage::new(config(vec![table])),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn referenced_query_must_exist() {
        let mut table = leads_table(vec![primary_query(), list_query()]);
        table.referenced_queries = vec!["MissingQuery".to_string()];
        assert!(matches!(
            Storage::new(config(vec![table])),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn insert_without_returning_all_is_rejected() {
        let mut table = leads_table(vec![primary_query(), list_query()]);
        table.insert_sql = "insert into leads (name) values (:name)".to_string();
        assert!(matches!(
            Storage::new(config(vec![table])),
            Err(StorageError::Config { .. })
        ));
    }

    #[test]
    fn key_name_renders_scalar_key() {
        let storage =
            Storage::new(config(vec![leads_table(vec![primary_query(), list_query()])]))
                .expect("storage");

        let lead = Lead {
            lead_id: 42,
            user_id: 7,
            name: "A".to_string(),
        };
        assert_eq!(
            storage.key_name("LeadsGetByID", &lead).expect("key"),
            "service:leads|Lead|lead_id=42"
        );
        assert_eq!(
            storage.key_name("LeadsGetByUserID", &lead).expect("key"),
            "service:leads|Lead|user_id=7"
        );
    }

    #[test]
    fn unknown_query_is_contract_violation() {
        let storage =
            Storage::new(config(vec![leads_table(vec![primary_query(), list_query()])]))
                .expect("storage");
        let lead = Lead::default();
        assert!(matches!(
            storage.key_name("Nope", &lead),
            Err(StorageError::Contract { .. })
        ));
    }
}

//! Query declarations and their parsed runtime form.

use serde_json::Value;

use crate::entity::FieldMap;
use crate::error::StorageError;
use crate::model::{CacheAction, DataStructure, KeyTemplate, SelectOptions};

const METADATA_KEY_SUFFIX: &str = "|metadata";

/// Declarative query definition.
///
/// A query bundles the SQL that answers it, the cache-key template its
/// results live under, and the action the cache takes when a row covered
/// by the query is inserted, updated, or selected. Deletes always apply
/// [`CacheAction::Del`].
///
/// ```
/// use strato::{CacheAction, Query};
///
/// let by_id = Query {
///     name: "LeadsGetByID".to_string(),
///     sql: "select * from leads where lead_id=:lead_id".to_string(),
///     cache_key: "lead_id=%v".to_string(),
///     ttl: 0,
///     primary_query_stored: None,
///     insert_action: CacheAction::Set,
///     update_action: CacheAction::Set,
///     select_action: CacheAction::Set,
/// };
/// # let _ = by_id;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Globally unique name the application selects the query by.
    pub name: String,

    /// Parameterized SQL with `:name` placeholders.
    pub sql: String,

    /// Cache-key template, e.g. `lead_id=%v` or `group_id=%v|role!=OWNER`.
    pub cache_key: String,

    /// Time to live in seconds. `0` uses the engine default, `-1` never
    /// expires.
    pub ttl: i64,

    /// For list queries: the primary query whose rows the id-list refers
    /// to. Required whenever any action is a list push.
    pub primary_query_stored: Option<String>,

    pub insert_action: CacheAction,
    pub update_action: CacheAction,
    pub select_action: CacheAction,
}

/// A validated query bound to its table, with every derived form
/// precomputed.
#[derive(Debug)]
pub(crate) struct ParsedQuery {
    pub name: String,
    pub sql: String,
    pub limit_offset_sql: String,
    pub template: KeyTemplate,
    /// `service:<svc>|<table>` prefix shared by every key variant.
    pub prefix: String,
    pub ttl: i64,
    pub structure: Option<DataStructure>,
    pub insert_action: CacheAction,
    pub update_action: CacheAction,
    pub select_action: CacheAction,
    pub primary_query_stored: Option<String>,
    /// Slice-typed parameters appearing in the SQL as `(:name)`.
    pub slice_params: Vec<String>,
    /// Entity name of the owning table.
    pub table: String,
}

impl ParsedQuery {
    pub(crate) fn parse(
        query: &Query,
        service_name: &str,
        table: &str,
        slice_fields: &[String],
        default_ttl: i64,
    ) -> Result<Self, StorageError> {
        if query.name.is_empty() {
            return Err(StorageError::config(format!(
                "table `{table}`: query name is required"
            )));
        }
        if query.sql.is_empty() {
            return Err(StorageError::config(format!(
                "query `{}`: sql is required",
                query.name
            )));
        }

        let template = KeyTemplate::parse(&query.cache_key).map_err(|err| {
            StorageError::config(format!("query `{}`: {err}", query.name))
        })?;

        let structure = crate::model::classify_actions(
            query.insert_action,
            query.update_action,
            query.select_action,
        )
        .map_err(|err| StorageError::config(format!("query `{}`: {err}", query.name)))?;

        let slice_params: Vec<String> = slice_fields
            .iter()
            .filter(|field| query.sql.contains(&format!("(:{field})")))
            .cloned()
            .collect();

        if !slice_params.is_empty() && structure.is_some() {
            return Err(StorageError::config(format!(
                "query `{}`: slice parameters require all actions to be NoAction; \
                 the key space of an IN query cannot be enumerated",
                query.name
            )));
        }

        if structure == Some(DataStructure::List) && query.primary_query_stored.is_none() {
            return Err(StorageError::config(format!(
                "query `{}`: list actions require primary_query_stored",
                query.name
            )));
        }

        Ok(Self {
            name: query.name.clone(),
            sql: query.sql.clone(),
            limit_offset_sql: format!("{} LIMIT :limit OFFSET :offset", query.sql),
            template,
            prefix: format!("service:{service_name}|{table}"),
            ttl: if query.ttl == 0 { default_ttl } else { query.ttl },
            structure,
            insert_action: query.insert_action,
            update_action: query.update_action,
            select_action: query.select_action,
            primary_query_stored: query.primary_query_stored.clone(),
            slice_params,
            table: table.to_string(),
        })
    }

    pub(crate) fn is_list(&self) -> bool {
        self.structure == Some(DataStructure::List)
    }

    /// Whether a write on this row affects the query's keys.
    pub(crate) fn matches(&self, map: &FieldMap) -> bool {
        self.template.matches(map)
    }

    /// Scalar key: `service:<svc>|<table>|<substituted template>`.
    pub(crate) fn key_name(&self, map: &FieldMap) -> String {
        format!("{}|{}", self.prefix, self.template.render(map))
    }

    /// List key: scalar key plus the offset/limit slice coordinates.
    pub(crate) fn list_key_name(&self, map: &FieldMap, opts: &SelectOptions) -> String {
        format!(
            "{}|offset:{}|limit:{}",
            self.key_name(map),
            opts.offset,
            opts.limit
        )
    }

    /// Metadata key: the directory of cached list slices for this key.
    pub(crate) fn metadata_key_name(&self, map: &FieldMap) -> String {
        format!("{}{METADATA_KEY_SUFFIX}", self.key_name(map))
    }

    /// SQL for a caller-paged select. The limit/offset variant only
    /// applies when the caller set a positive limit.
    pub(crate) fn paged_sql(&self, limit: i64) -> &str {
        if limit > 0 {
            &self.limit_offset_sql
        } else {
            &self.sql
        }
    }

    /// Inline slice parameters into the SQL as literal lists.
    ///
    /// No-op for queries without slice parameters.
    pub(crate) fn expand_sql(&self, sql: &str, map: &FieldMap) -> Result<String, StorageError> {
        if self.slice_params.is_empty() {
            return Ok(sql.to_string());
        }

        let mut expanded = sql.to_string();
        for param in &self.slice_params {
            let Some(Value::Array(values)) = map.get(param.as_str()) else {
                return Err(StorageError::contract(format!(
                    "query `{}`: slice parameter `{param}` must be a non-null array",
                    self.name
                )));
            };
            if values.is_empty() {
                return Err(StorageError::contract(format!(
                    "query `{}`: slice parameter `{param}` must not be empty",
                    self.name
                )));
            }

            let rendered: Result<Vec<String>, StorageError> = values
                .iter()
                .map(|value| match value {
                    Value::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(StorageError::contract(format!(
                        "query `{}`: slice parameter `{param}` holds unsupported value {other}",
                        self.name
                    ))),
                })
                .collect();

            expanded = expanded.replace(&format!("(:{param})"), &format!("({})", rendered?.join(", ")));
        }
        Ok(expanded)
    }
}

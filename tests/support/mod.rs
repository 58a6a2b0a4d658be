//! Shared fixtures for the coherence tests.
//!
//! `FakeDb` is a scripted [`SqlHandle`]: each SQL text maps to a
//! responder producing rows, and every call is recorded so tests can
//! assert how often the database was actually hit.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strato::entity::{PRIMARY_KEY_TAG, TYPE_TAG};
use strato::{
    CacheAction, Config, DbError, Entity, FieldMap, MemoryCache, Prototype, Query, SqlHandle,
    SqlTransaction, SqlWriteHandle, Storage, Table,
};

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: i64,
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub notes: String,
    /// Parameter-only field for IN queries; not a table column.
    #[serde(default)]
    pub lead_ids: Vec<i64>,
}

impl Entity for Lead {
    fn entity_name() -> &'static str {
        "Lead"
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub member_id: i64,
    pub group_id: i64,
    pub role: String,
}

impl Entity for GroupMember {
    fn entity_name() -> &'static str {
        "GroupMember"
    }
}

// ============================================================================
// SQL fixtures
// ============================================================================

pub const LEADS_INSERT: &str =
    "insert into leads (user_id, name, email, notes) values (:user_id, :name, :email, :notes) returning *";
pub const LEADS_UPDATE: &str =
    "update leads set notes=:notes where lead_id=:lead_id returning *";
pub const LEADS_BY_ID: &str = "select * from leads where lead_id=:lead_id";
pub const LEADS_BY_USER: &str = "select * from leads where user_id=:user_id";

pub const MEMBERS_INSERT: &str =
    "insert into group_members (group_id, role) values (:group_id, :role) returning *";
pub const MEMBERS_BY_ID: &str = "select * from group_members where member_id=:member_id";
pub const MEMBERS_BY_GROUP: &str =
    "select * from group_members where group_id=:group_id and role!='OWNER'";

pub fn leads_table() -> Table {
    Table {
        entity: Prototype::of::<Lead>().expect("lead prototype"),
        primary_key_field: "lead_id".to_string(),
        primary_query: "LeadsGetByID".to_string(),
        insert_sql: LEADS_INSERT.to_string(),
        update_sql: LEADS_UPDATE.to_string(),
        queries: vec![
            Query {
                name: "LeadsGetByID".to_string(),
                sql: LEADS_BY_ID.to_string(),
                cache_key: "lead_id=%v".to_string(),
                insert_action: CacheAction::Set,
                update_action: CacheAction::Set,
                select_action: CacheAction::Set,
                ..Default::default()
            },
            Query {
                name: "LeadsGetByUserID".to_string(),
                sql: LEADS_BY_USER.to_string(),
                cache_key: "user_id=%v".to_string(),
                primary_query_stored: Some("LeadsGetByID".to_string()),
                insert_action: CacheAction::RPush,
                update_action: CacheAction::None,
                select_action: CacheAction::RPush,
                ..Default::default()
            },
        ],
        referenced_queries: vec![],
    }
}

pub fn members_table() -> Table {
    Table {
        entity: Prototype::of::<GroupMember>().expect("member prototype"),
        primary_key_field: "member_id".to_string(),
        primary_query: "MembersGetByID".to_string(),
        insert_sql: MEMBERS_INSERT.to_string(),
        update_sql: String::new(),
        queries: vec![
            Query {
                name: "MembersGetByID".to_string(),
                sql: MEMBERS_BY_ID.to_string(),
                cache_key: "member_id=%v".to_string(),
                insert_action: CacheAction::Set,
                update_action: CacheAction::Set,
                select_action: CacheAction::Set,
                ..Default::default()
            },
            Query {
                name: "MembersGetByGroup".to_string(),
                sql: MEMBERS_BY_GROUP.to_string(),
                cache_key: "group_id=%v|role!=OWNER".to_string(),
                primary_query_stored: Some("MembersGetByID".to_string()),
                insert_action: CacheAction::RPush,
                update_action: CacheAction::None,
                select_action: CacheAction::RPush,
                ..Default::default()
            },
        ],
        referenced_queries: vec![],
    }
}

/// Config over the fake database and an in-memory cache.
pub fn test_config(db: &FakeDb, cache: Arc<MemoryCache>, tables: Vec<Table>) -> Config {
    Config::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        cache,
        "leads",
        tables,
    )
}

/// Storage over the standard leads table with default options.
pub fn leads_storage(db: &FakeDb, cache: Arc<MemoryCache>) -> Storage {
    Storage::new(test_config(db, cache, vec![leads_table()])).expect("valid storage config")
}

/// Turn a JSON object literal into a row map.
pub fn row(value: Value) -> FieldMap {
    value.as_object().expect("row literal must be an object").clone()
}

// ============================================================================
// Scripted database
// ============================================================================

type Responder = Box<dyn Fn(&FieldMap) -> Vec<FieldMap> + Send + Sync>;

#[derive(Default)]
struct FakeDbState {
    responders: HashMap<String, Responder>,
    calls: Vec<(String, FieldMap)>,
    commits: usize,
    rollbacks: usize,
    fail_commit: bool,
}

/// Scripted [`SqlHandle`] + [`SqlWriteHandle`].
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<FakeDbState>>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `sql` with fixed rows on every call.
    pub fn on(&self, sql: &str, rows: Vec<FieldMap>) {
        self.on_fn(sql, move |_| rows.clone());
    }

    /// Respond to `sql` by computing rows from the bound parameters.
    pub fn on_fn(
        &self,
        sql: &str,
        responder: impl Fn(&FieldMap) -> Vec<FieldMap> + Send + Sync + 'static,
    ) {
        self.state
            .lock()
            .unwrap()
            .responders
            .insert(sql.to_string(), Box::new(responder));
    }

    /// How many times `sql` was executed.
    pub fn calls(&self, sql: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(s, _)| s == sql)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }

    /// Make the next (and every later) commit fail.
    pub fn fail_commit(&self) {
        self.state.lock().unwrap().fail_commit = true;
    }

    fn run(&self, sql: &str, params: &FieldMap) -> Result<Vec<FieldMap>, DbError> {
        let state = self.state.lock().unwrap();
        let Some(responder) = state.responders.get(sql) else {
            return Err(DbError::Backend(format!("unscripted sql: {sql}")));
        };
        let rows = responder(params);
        drop(state);

        self.state
            .lock()
            .unwrap()
            .calls
            .push((sql.to_string(), params.clone()));

        // Tag rows the way the real handle does.
        Ok(rows
            .into_iter()
            .map(|mut row| {
                if let Some(tag) = params.get(TYPE_TAG) {
                    row.insert(TYPE_TAG.to_string(), tag.clone());
                }
                if let Some(tag) = params.get(PRIMARY_KEY_TAG) {
                    row.insert(PRIMARY_KEY_TAG.to_string(), tag.clone());
                }
                row
            })
            .collect())
    }
}

#[async_trait]
impl SqlHandle for FakeDb {
    async fn fetch(&self, sql: &str, params: &FieldMap) -> Result<Vec<FieldMap>, DbError> {
        self.run(sql, params)
    }
}

#[async_trait]
impl SqlWriteHandle for FakeDb {
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, DbError> {
        Ok(Box::new(FakeTx { db: self.clone() }))
    }
}

pub struct FakeTx {
    db: FakeDb,
}

#[async_trait]
impl SqlHandle for FakeTx {
    async fn fetch(&self, sql: &str, params: &FieldMap) -> Result<Vec<FieldMap>, DbError> {
        self.db.run(sql, params)
    }
}

#[async_trait]
impl SqlTransaction for FakeTx {
    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let mut state = self.db.state.lock().unwrap();
        if state.fail_commit {
            return Err(DbError::Backend("scripted commit failure".to_string()));
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.db.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

//! Transactional write path: cache actions are buffered and only replay
//! after a successful commit.

mod support;

use std::sync::Arc;

use serde_json::json;
use strato::{KvCache, MemoryCache, Storage};

use support::{leads_storage, row, FakeDb, Lead, LEADS_BY_ID, LEADS_INSERT, LEADS_UPDATE};

fn script_writes(db: &FakeDb) {
    db.on_fn(LEADS_INSERT, |params| {
        let user_id = params.get("user_id").and_then(|v| v.as_i64()).unwrap_or(0);
        // Generated id derived from the input so two inserts differ.
        vec![row(json!({
            "lead_id": 200 + user_id,
            "user_id": user_id,
            "name": params.get("name").cloned().unwrap_or_default(),
            "email": "",
            "notes": "",
        }))]
    });
    db.on_fn(LEADS_UPDATE, |params| {
        vec![row(json!({
            "lead_id": params.get("lead_id").cloned().unwrap_or_default(),
            "user_id": params.get("user_id").cloned().unwrap_or_default(),
            "name": "A",
            "email": "",
            "notes": params.get("notes").cloned().unwrap_or_default(),
        }))]
    });
}

fn storage_with_cache(db: &FakeDb) -> (Storage, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    (leads_storage(db, cache.clone()), cache)
}

#[tokio::test]
async fn rollback_leaves_no_cache_mutation() {
    let db = FakeDb::new();
    let (storage, cache) = storage_with_cache(&db);
    script_writes(&db);

    let mut tx = storage.begin().await.expect("begin");

    let mut first = Lead {
        user_id: 1,
        name: "L1".to_string(),
        ..Default::default()
    };
    let mut second = Lead {
        user_id: 2,
        name: "L2".to_string(),
        ..Default::default()
    };
    tx.insert(&mut first).await.expect("insert L1");
    tx.insert(&mut second).await.expect("insert L2");

    // The SQL ran inside the transaction and the entities rehydrated.
    assert_eq!(db.calls(LEADS_INSERT), 2);
    assert_eq!(first.lead_id, 201);
    assert_eq!(second.lead_id, 202);

    tx.rollback().await.expect("rollback");

    assert_eq!(db.rollbacks(), 1);
    assert_eq!(db.commits(), 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn cache_stays_untouched_until_commit() {
    let db = FakeDb::new();
    let (storage, cache) = storage_with_cache(&db);
    script_writes(&db);

    let mut tx = storage.begin().await.expect("begin");
    let mut lead = Lead {
        user_id: 1,
        name: "L1".to_string(),
        ..Default::default()
    };
    tx.insert(&mut lead).await.expect("insert");

    // Inside the transaction the cache has not seen the write.
    assert!(cache.is_empty());

    tx.end().await.expect("end");
    assert_eq!(db.commits(), 1);

    let cached = cache
        .get_raw("service:leads|Lead|lead_id=201")
        .await
        .expect("cached after commit");
    let cached: serde_json::Value = serde_json::from_str(&cached).expect("json");
    assert_eq!(cached["name"], "L1");
}

#[tokio::test]
async fn commit_replays_actions_in_buffer_order() {
    let db = FakeDb::new();
    let (storage, cache) = storage_with_cache(&db);
    script_writes(&db);

    // Seed the by-user list so deferred inserts extend it on commit.
    cache
        .rpush("service:leads|Lead|user_id=1", &["100".to_string()])
        .await
        .expect("seed list");

    let mut tx = storage.begin().await.expect("begin");
    let mut first = Lead {
        user_id: 1,
        name: "L1".to_string(),
        ..Default::default()
    };
    tx.insert(&mut first).await.expect("insert");

    let mut updated = Lead {
        lead_id: 201,
        user_id: 1,
        notes: "edited".to_string(),
        ..Default::default()
    };
    tx.update(&mut updated).await.expect("update");

    tx.end().await.expect("end");

    // Insert pushed the id, the later update re-set the scalar key.
    let members = cache
        .lrange("service:leads|Lead|user_id=1", 0, -1)
        .await
        .expect("lrange");
    assert_eq!(members, vec!["100", "201"]);

    let cached = cache
        .get_raw("service:leads|Lead|lead_id=201")
        .await
        .expect("scalar key");
    let cached: serde_json::Value = serde_json::from_str(&cached).expect("json");
    assert_eq!(cached["notes"], "edited");
}

#[tokio::test]
async fn failed_commit_skips_cache_replay() {
    let db = FakeDb::new();
    let (storage, cache) = storage_with_cache(&db);
    script_writes(&db);
    db.fail_commit();

    let mut tx = storage.begin().await.expect("begin");
    let mut lead = Lead {
        user_id: 1,
        name: "L1".to_string(),
        ..Default::default()
    };
    tx.insert(&mut lead).await.expect("insert");

    let err = tx.end().await.unwrap_err();
    assert!(matches!(err, strato::StorageError::Db(_)));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn transactional_reads_use_the_transaction_handle() {
    let db = FakeDb::new();
    let (storage, cache) = storage_with_cache(&db);
    db.on_fn(LEADS_BY_ID, |params| {
        let lead_id = params.get("lead_id").and_then(|v| v.as_i64()).unwrap();
        vec![row(json!({
            "lead_id": lead_id,
            "user_id": 7,
            "name": "A",
            "email": "",
            "notes": "",
        }))]
    });

    let tx = storage.begin().await.expect("begin");
    let mut lead = Lead {
        lead_id: 42,
        ..Default::default()
    };
    tx.select(&mut lead, "LeadsGetByID").await.expect("select");
    assert_eq!(lead.user_id, 7);
    assert_eq!(db.calls(LEADS_BY_ID), 1);

    // The read path still applies its select action immediately; only
    // write actions defer to commit.
    assert!(cache
        .exists("service:leads|Lead|lead_id=42")
        .await
        .expect("exists"));

    tx.rollback().await.expect("rollback");
}

use super::*;
use crate::doc::{Assert, OpKind};
use mse_core::{Collection, FakeClock, ModelUuid};
use tempfile::tempdir;

fn unit_key(model: &ModelUuid, name: &str) -> DocKey {
    DocKey::scoped(model.clone(), Collection::Units, name).unwrap()
}

#[test]
fn insert_then_get_round_trips() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let key = unit_key(&model, "mysql/0");

    let ops = vec![Op::insert(key.clone(), serde_json::json!({"name": "mysql/0"}))];
    let feed = store.commit(ops, &clock).unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].collection, Collection::Units);
    assert!(feed[0].revno >= 1);

    let (doc, rev) = store.get(&key).unwrap();
    assert_eq!(doc["name"], "mysql/0");
    assert_eq!(rev, feed[0].revno);
}

#[test]
fn doc_missing_assert_rejects_duplicate_insert() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let key = unit_key(&model, "mysql/0");

    store.commit(vec![Op::insert(key.clone(), serde_json::json!({}))], &clock).unwrap();
    let err = store.commit(vec![Op::insert(key, serde_json::json!({}))], &clock).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[test]
fn remove_publishes_deleted_revision() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let key = unit_key(&model, "mysql/0");

    store.commit(vec![Op::insert(key.clone(), serde_json::json!({}))], &clock).unwrap();
    let feed = store.commit(vec![Op::remove(key.clone(), Assert::DocExists)], &clock).unwrap();
    assert_eq!(feed[0].revno, DELETED_REVISION);
    assert!(store.get(&key).is_none());
}

#[test]
fn whole_batch_is_rejected_when_one_assertion_fails() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let good = unit_key(&model, "mysql/0");
    let bad = unit_key(&model, "mysql/1");

    let ops = vec![
        Op::insert(good.clone(), serde_json::json!({})),
        Op::update(bad, Assert::DocExists, serde_json::json!({})),
    ];
    let err = store.commit(ops, &clock).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert!(store.get(&good).is_none(), "partial commit must not apply any op");
}

#[test]
fn field_greater_than_zero_guards_against_double_decrement() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let key = DocKey::scoped(model, Collection::StorageInstances, "data/0").unwrap();

    store
        .commit(vec![Op::insert(key.clone(), serde_json::json!({"refcount": 1}))], &clock)
        .unwrap();
    store
        .commit(
            vec![Op::update(
                key.clone(),
                Assert::FieldGreaterThanZero { field: "refcount".into() },
                serde_json::json!({"refcount": 0}),
            )],
            &clock,
        )
        .unwrap();

    let err = store
        .commit(
            vec![Op::update(
                key,
                Assert::FieldGreaterThanZero { field: "refcount".into() },
                serde_json::json!({"refcount": -1}),
            )],
            &clock,
        )
        .unwrap_err();
    assert!(matches!(err, Error::ExcessiveContention(_)));
}

#[test]
fn revno_is_strictly_increasing_per_key() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let key = unit_key(&model, "mysql/0");

    store.commit(vec![Op::insert(key.clone(), serde_json::json!({"n": 0}))], &clock).unwrap();
    let mut last = store.get(&key).unwrap().1;
    for n in 1..5 {
        store
            .commit(
                vec![Op::update(key.clone(), Assert::DocExists, serde_json::json!({"n": n}))],
                &clock,
            )
            .unwrap();
        let rev = store.get(&key).unwrap().1;
        assert!(rev > last);
        last = rev;
    }
}

#[test]
fn reopen_recovers_state_from_wal() {
    let dir = tempdir().unwrap();
    let model = ModelUuid::new();
    let key = unit_key(&model, "mysql/0");
    {
        let store = Store::open(dir.path()).unwrap();
        let clock = FakeClock::new();
        store
            .commit(vec![Op::insert(key.clone(), serde_json::json!({"name": "mysql/0"}))], &clock)
            .unwrap();
        store.flush().unwrap();
    }
    let store = Store::open(dir.path()).unwrap();
    let (doc, _) = store.get(&key).unwrap();
    assert_eq!(doc["name"], "mysql/0");
}

#[test]
fn checkpoint_then_reopen_still_recovers() {
    let dir = tempdir().unwrap();
    let model = ModelUuid::new();
    let key = unit_key(&model, "mysql/0");
    {
        let store = Store::open(dir.path()).unwrap();
        let clock = FakeClock::new();
        store
            .commit(vec![Op::insert(key.clone(), serde_json::json!({"name": "mysql/0"}))], &clock)
            .unwrap();
        store.checkpoint(dir.path()).unwrap();
        store
            .commit(
                vec![Op::update(key.clone(), Assert::DocExists, serde_json::json!({"name": "mysql/0", "extra": true}))],
                &clock,
            )
            .unwrap();
    }
    let store = Store::open(dir.path()).unwrap();
    let (doc, _) = store.get(&key).unwrap();
    assert_eq!(doc["extra"], true);
}

#[test]
fn subscribers_receive_committed_changes() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let mut rx = store.subscribe();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let key = unit_key(&model, "mysql/0");

    store.commit(vec![Op::insert(key.clone(), serde_json::json!({}))], &clock).unwrap();

    let entry = rx.try_recv().unwrap();
    assert_eq!(entry.id, key.wire_id());
}

#[test]
fn find_filters_by_collection() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    store
        .commit(
            vec![Op::insert(unit_key(&model, "mysql/0"), serde_json::json!({}))],
            &clock,
        )
        .unwrap();
    store
        .commit(
            vec![Op::insert(
                DocKey::scoped(model, Collection::Machines, "0").unwrap(),
                serde_json::json!({}),
            )],
            &clock,
        )
        .unwrap();

    let units = store.find(Collection::Units);
    assert_eq!(units.len(), 1);
}

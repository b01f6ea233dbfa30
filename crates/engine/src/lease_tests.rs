use super::*;
use mse_core::FakeClock;
use mse_store::Store;

#[test]
fn claim_inserts_when_no_lease_exists() {
    let model = ModelUuid::new();
    let ops = claim_ops(None, model, "leadership", "mysql", "mysql/0", 30_000_000_000, "mysql/0", 1_000).unwrap();
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0].kind, mse_store::doc::OpKind::Insert(_)));
}

#[test]
fn claim_rejects_a_still_live_lease() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 1_000, duration: 30_000_000_000, writer: "mysql/0".into() };
    let err = claim_ops(Some(&existing), model, "leadership", "mysql", "mysql/1", 30_000_000_000, "mysql/1", 2_000).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[test]
fn claim_replaces_an_expired_lease() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 1_000, duration: 100, writer: "mysql/0".into() };
    let ops = claim_ops(Some(&existing), model, "leadership", "mysql", "mysql/1", 30_000_000_000, "mysql/1", 1_000_000).unwrap();
    assert_eq!(ops.len(), 1);
    match &ops[0].kind {
        mse_store::doc::OpKind::Update(doc) => assert_eq!(doc["holder"], "mysql/1"),
        _ => panic!("expected update"),
    }
}

#[test]
fn renew_rejects_a_holder_mismatch() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 0, duration: 30_000_000_000, writer: "mysql/0".into() };
    let err = renew_ops(&existing, model, "leadership", "mysql", "mysql/1", 30_000_000_000, 1_000).unwrap_err();
    assert!(matches!(err, Error::NotValid(_)));
}

#[test]
fn renew_rejects_an_already_expired_lease() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 0, duration: 10, writer: "mysql/0".into() };
    let err = renew_ops(&existing, model, "leadership", "mysql", "mysql/0", 30_000_000_000, 1_000).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn renew_extends_a_live_lease_held_by_the_caller() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 0, duration: 30_000_000_000, writer: "mysql/0".into() };
    let ops = renew_ops(&existing, model, "leadership", "mysql", "mysql/0", 60_000_000_000, 1_000).unwrap();
    assert_eq!(ops.len(), 1);
    match &ops[0].kind {
        mse_store::doc::OpKind::Update(doc) => assert_eq!(doc["duration"], 60_000_000_000u64),
        _ => panic!("expected update"),
    }
}

#[test]
fn expire_rejects_a_still_live_lease() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 0, duration: 30_000_000_000, writer: "mysql/0".into() };
    let err = expire_ops(&existing, model, "leadership", "mysql", 1_000).unwrap_err();
    assert!(matches!(err, Error::NotValid(_)));
}

#[test]
fn expire_removes_a_lapsed_lease() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 0, duration: 10, writer: "mysql/0".into() };
    let ops = expire_ops(&existing, model, "leadership", "mysql", 1_000).unwrap();
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0].kind, mse_store::doc::OpKind::Remove));
}

#[test]
fn revoke_rejects_a_holder_mismatch() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 0, duration: 30_000_000_000, writer: "mysql/0".into() };
    let err = revoke_ops(&existing, model, "leadership", "mysql", "mysql/1").unwrap_err();
    assert!(matches!(err, Error::NotValid(_)));
}

#[test]
fn revoke_removes_a_lease_regardless_of_remaining_duration() {
    let model = ModelUuid::new();
    let existing = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 0, duration: 30_000_000_000, writer: "mysql/0".into() };
    let ops = revoke_ops(&existing, model, "leadership", "mysql", "mysql/0").unwrap();
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0].kind, mse_store::doc::OpKind::Remove));
}

#[test]
fn legacy_leases_rebases_remaining_duration_onto_the_local_clock() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let lease = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), start: 1_000, duration: 500, writer: "mysql/0".into() };
    store.commit(vec![Op::insert(key(model.clone(), "leadership", "mysql"), serde_json::to_value(&lease).unwrap())], &clock).unwrap();

    let results = legacy_leases(&store, &model, 9_000, 1_200);
    assert_eq!(results.len(), 1);
    let (found, effective_local_expiry) = &results[0];
    assert_eq!(found.holder, "mysql/0");
    // end=1500, global_now=1200, remaining=300, local_now=9000 -> 9300
    assert_eq!(*effective_local_expiry, 9_300);
}

#[test]
fn migrate_legacy_lease_removes_the_old_doc_and_inserts_the_current_form() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let legacy = LegacyLeaseDoc { namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), expiry_ms: 123 };
    let old_key = legacy_key(model.clone(), &legacy.namespace, &legacy.name);
    store.commit(vec![Op::insert(old_key.clone(), serde_json::to_value(&legacy).unwrap())], &clock).unwrap();

    let ops = migrate_legacy_lease_ops(&legacy, model.clone(), 30_000_000_000, 5_000);
    store.commit(ops, &clock).unwrap();

    assert!(store.get(&old_key).is_none());
    let migrated = find(&store, &model, "leadership", "mysql").unwrap();
    assert_eq!(migrated.start, 5_000);
    assert_eq!(migrated.duration, 30_000_000_000);
}

#[test]
fn migrate_legacy_lease_is_a_noop_against_a_key_already_claimed_live() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let legacy = LegacyLeaseDoc { namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/0".into(), expiry_ms: 123 };
    let old_key = legacy_key(model.clone(), &legacy.namespace, &legacy.name);
    let live = Lease { model: model.clone(), namespace: "leadership".into(), name: "mysql".into(), holder: "mysql/1".into(), start: 10, duration: 30_000_000_000, writer: "mysql/1".into() };
    store
        .commit(vec![Op::insert(old_key, serde_json::to_value(&legacy).unwrap()), Op::insert(key(model.clone(), "leadership", "mysql"), serde_json::to_value(&live).unwrap())], &clock)
        .unwrap();

    let ops = migrate_legacy_lease_ops(&legacy, model.clone(), 30_000_000_000, 5_000);
    let result = store.commit(ops, &clock);
    assert!(result.is_err(), "insert against an already-live key must fail, leaving the live claim untouched");

    let still_live = find(&store, &model, "leadership", "mysql").unwrap();
    assert_eq!(still_live.holder, "mysql/1");
}

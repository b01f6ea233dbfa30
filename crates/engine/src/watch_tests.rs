use super::*;
use mse_core::{Collection, FakeClock, ModelUuid};
use mse_store::Store;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(1);

async fn next<T>(w: &mut BaseWatcher<T>) -> T {
    timeout(WAIT, w.changes()).await.expect("watcher timed out").expect("watcher channel closed")
}

#[tokio::test]
async fn entity_notify_sends_an_initial_signal_then_only_on_matching_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let machine = crate::entities::machine::Machine::new(model.clone(), "0", "jammy");
    store.commit(vec![machine.create_op()], &clock).unwrap();

    let mut targets = BTreeSet::new();
    targets.insert((Collection::Machines, "0".to_string()));
    let mut watcher = entity_notify(store.clone(), targets);

    next(&mut watcher).await;

    let other = crate::entities::machine::Machine::new(model.clone(), "1", "jammy");
    store.commit(vec![other.create_op()], &clock).unwrap();
    assert!(timeout(Duration::from_millis(100), watcher.changes()).await.is_err(), "untracked machine must not wake the watcher");

    let mut updated = machine.clone();
    updated.life = mse_core::Life::Dying;
    store
        .commit(vec![mse_store::doc::Op::update(
            crate::entities::machine::key(model.clone(), "0"),
            mse_store::doc::Assert::Always,
            serde_json::to_value(&updated).unwrap(),
        )], &clock)
        .unwrap();
    next(&mut watcher).await;

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn lifecycle_strings_reports_initial_set_then_never_repeats_a_dead_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let zero = crate::entities::machine::Machine::new(model.clone(), "0", "jammy");
    store.commit(vec![zero.create_op()], &clock).unwrap();

    let mut watcher = lifecycle_strings(store.clone(), model.clone(), Collection::Machines, None);
    let initial = next(&mut watcher).await;
    assert_eq!(initial, vec!["0".to_string()]);

    let one = crate::entities::machine::Machine::new(model.clone(), "1", "jammy");
    let two = crate::entities::machine::Machine::new(model.clone(), "2", "jammy");
    store.commit(vec![one.create_op(), two.create_op()], &clock).unwrap();
    let mut added = next(&mut watcher).await;
    added.sort();
    assert_eq!(added, vec!["1".to_string(), "2".to_string()]);

    let mut dying = one.clone();
    dying.life = mse_core::Life::Dying;
    store
        .commit(vec![mse_store::doc::Op::update(
            crate::entities::machine::key(model.clone(), "1"),
            mse_store::doc::Assert::Always,
            serde_json::to_value(&dying).unwrap(),
        )], &clock)
        .unwrap();
    let changed = next(&mut watcher).await;
    assert_eq!(changed, vec!["1".to_string()]);

    store
        .commit(vec![mse_store::doc::Op::remove(
            crate::entities::machine::key(model.clone(), "1"),
            mse_store::doc::Assert::Always,
        )], &clock)
        .unwrap();
    let removed = next(&mut watcher).await;
    assert_eq!(removed, vec!["1".to_string()]);

    // "1" is gone for good: touching an unrelated machine must not resurrect it.
    let mut two_touched = two.clone();
    two_touched.upgrade_series_lock = true;
    store
        .commit(vec![mse_store::doc::Op::update(
            crate::entities::machine::key(model.clone(), "2"),
            mse_store::doc::Assert::Always,
            serde_json::to_value(&two_touched).unwrap(),
        )], &clock)
        .unwrap();
    let after = next(&mut watcher).await;
    assert_eq!(after, vec!["2".to_string()]);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn relation_scope_reports_entered_then_left() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let a = crate::entities::relation::Endpoint {
        application: "mysql".into(),
        role: crate::entities::relation::EndpointRole::Provider,
        interface: "db".into(),
        scope: crate::entities::relation::EndpointScope::Global,
    };
    let b = crate::entities::relation::Endpoint {
        application: "wordpress".into(),
        role: crate::entities::relation::EndpointRole::Requirer,
        interface: "db".into(),
        scope: crate::entities::relation::EndpointScope::Global,
    };
    let relation = crate::entities::relation::Relation::new(model.clone(), 1, a, b);
    store.commit(vec![relation.create_op()], &clock).unwrap();

    let mut watcher = relation_scope(store.clone(), model.clone(), 1);
    let initial = next(&mut watcher).await;
    assert!(initial.entered.is_empty() && initial.left.is_empty());

    let ops = enter_scope_ops_for_test(&relation, "mysql/0");
    store.commit(ops, &clock).unwrap();
    let entered = next(&mut watcher).await;
    assert_eq!(entered.entered, vec!["mysql/0".to_string()]);
    assert!(entered.left.is_empty());

    let scope_key = crate::entities::relation::scope_key(model.clone(), 1, crate::entities::relation::EndpointRole::Provider, "mysql/0");
    store.commit(vec![mse_store::doc::Op::remove(scope_key, mse_store::doc::Assert::Always)], &clock).unwrap();
    let left = next(&mut watcher).await;
    assert_eq!(left.left, vec!["mysql/0".to_string()]);
    assert!(left.entered.is_empty());

    watcher.stop().await.unwrap();
}

fn enter_scope_ops_for_test(relation: &crate::entities::relation::Relation, unit: &str) -> Vec<mse_store::doc::Op> {
    crate::entities::relation::enter_scope_ops(relation, crate::entities::relation::EndpointRole::Provider, unit)
}

#[tokio::test]
async fn document_field_emits_the_deleted_sentinel_on_removal() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let machine = crate::entities::machine::Machine::new(model.clone(), "0", "jammy");
    store.commit(vec![machine.create_op()], &clock).unwrap();
    let key = crate::entities::machine::key(model.clone(), "0");

    let mut watcher = document_field(store.clone(), key.clone(), |doc| doc["series"].as_str().unwrap_or_default().to_string(), "<gone>".to_string());
    let initial = next(&mut watcher).await;
    assert_eq!(initial, "jammy");

    store.commit(vec![mse_store::doc::Op::remove(key, mse_store::doc::Assert::Always)], &clock).unwrap();
    let after_removal = next(&mut watcher).await;
    assert_eq!(after_removal, "<gone>");

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn multi_hash_recomputes_only_when_the_combined_hash_changes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let a = crate::entities::machine::Machine::new(model.clone(), "0", "jammy");
    let b = crate::entities::machine::Machine::new(model.clone(), "1", "jammy");
    store.commit(vec![a.create_op(), b.create_op()], &clock).unwrap();

    let keys = vec![crate::entities::machine::key(model.clone(), "0"), crate::entities::machine::key(model.clone(), "1")];
    let hash = |docs: &[Option<serde_json::Value>]| {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for doc in docs {
            hasher.update(serde_json::to_vec(doc).unwrap());
        }
        hex::encode(hasher.finalize())
    };
    let mut watcher = multi_hash(store.clone(), keys.clone(), hash);
    let initial = next(&mut watcher).await;

    let mut updated = a.clone();
    updated.life = mse_core::Life::Dying;
    store
        .commit(vec![mse_store::doc::Op::update(keys[0].clone(), mse_store::doc::Assert::Always, serde_json::to_value(&updated).unwrap())], &clock)
        .unwrap();
    let changed = next(&mut watcher).await;
    assert_ne!(initial, changed);

    watcher.stop().await.unwrap();
}

#[tokio::test]
async fn base_watcher_kill_terminates_the_task_cooperatively() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).unwrap());
    let watcher = entity_notify(store, BTreeSet::new());
    watcher.kill();
    let result = timeout(WAIT, watcher.wait()).await.expect("wait timed out");
    assert!(result.is_ok());
}

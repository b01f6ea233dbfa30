use super::*;
use mse_core::{Collection, ModelUuid};
use mse_store::doc::OpKind;
use mse_store::{Assert, Store};

fn key() -> DocKey {
    DocKey::scoped(ModelUuid::new(), Collection::Units, "mysql/0").unwrap()
}

#[test]
fn advance_to_dying_sets_life_and_timestamp_and_asserts_alive() {
    let op = advance_to_dying(key(), serde_json::json!({"name": "mysql/0"}), 42);
    assert_eq!(op.assert, Assert::LifeEquals(Life::Alive));
    match op.kind {
        OpKind::Update(doc) => {
            assert_eq!(doc["life"], "dying");
            assert_eq!(doc["dying_at"], 42);
        }
        _ => panic!("expected update"),
    }
}

#[test]
fn advance_to_dead_asserts_dying() {
    let op = advance_to_dead(key(), serde_json::json!({"life": "dying"}));
    assert_eq!(op.assert, Assert::LifeEquals(Life::Dying));
    match op.kind {
        OpKind::Update(doc) => assert_eq!(doc["life"], "dead"),
        _ => panic!("expected update"),
    }
}

#[test]
fn remove_has_no_precondition() {
    let op = remove(key());
    assert_eq!(op.assert, Assert::Always);
    assert!(matches!(op.kind, OpKind::Remove));
}

#[test]
fn life_of_defaults_legacy_documents_to_alive() {
    assert_eq!(life_of(&serde_json::json!({"name": "x"})), Life::Alive);
    assert_eq!(life_of(&serde_json::json!({"life": "dying"})), Life::Dying);
}

#[test]
fn store_commit_rejects_transition_when_precondition_already_moved() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = mse_core::FakeClock::new();
    let k = key();
    store.commit(vec![Op::insert(k.clone(), serde_json::json!({"life": "dying"}))], &clock).unwrap();

    let op = advance_to_dying(k, serde_json::json!({}), 1);
    let err = store.commit(vec![op], &clock).unwrap_err();
    assert!(matches!(err, mse_core::Error::NotAlive(_)));
}

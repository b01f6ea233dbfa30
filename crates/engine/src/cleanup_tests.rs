use super::*;
use crate::entities::application::Application;
use crate::entities::unit::Unit;
use mse_core::{FakeClock, Life, ModelUuid};
use mse_store::Store;

#[test]
fn needs_cleanup_is_false_until_something_is_scheduled() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let model = ModelUuid::new();
    assert!(!needs_cleanup(&store, &model));
}

#[test]
fn scheduled_cleanup_is_picked_up_and_removed_by_run_cleanups() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let mut app = Application::new(model.clone(), "mysql", "ch:mysql");
    app.life = Life::Dying;
    app.unit_count = 1;
    let unit = Unit::new(model.clone(), "mysql", 0);
    store.commit(vec![app.create_op(), unit.create_op()], &clock).unwrap();

    let schedule_op = schedule(model.clone(), CleanupKind::UnitsForDyingApplication, "mysql", serde_json::Value::Null);
    store.commit(vec![schedule_op], &clock).unwrap();
    assert!(needs_cleanup(&store, &model));

    let processed = run_cleanups(&store, &clock, &model).unwrap();
    assert_eq!(processed, 1);
    assert!(!needs_cleanup(&store, &model));
    assert!(store.get(&crate::entities::unit::key(model.clone(), &unit.name)).is_none());
}

#[test]
fn run_cleanups_does_not_process_docs_scheduled_by_its_own_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    // ActionsForDyingUnit with no matching actions produces no new
    // cleanups, so this just exercises that scheduling during a run
    // doesn't get swept up in the same pass: schedule two independent
    // cleanups and confirm both (and only both) get processed.
    store
        .commit(
            vec![
                schedule(model.clone(), CleanupKind::ActionsForDyingUnit, "mysql/0", serde_json::Value::Null),
                schedule(model.clone(), CleanupKind::ActionsForDyingUnit, "mysql/1", serde_json::Value::Null),
            ],
            &clock,
        )
        .unwrap();

    let processed = run_cleanups(&store, &clock, &model).unwrap();
    assert_eq!(processed, 2);
}

#[test]
fn run_cleanups_drops_unreadable_docs_without_blocking_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    let bad_key = DocKey::scoped(model.clone(), mse_core::Collection::Cleanups, "bad").unwrap();
    store
        .commit(
            vec![
                Op::insert(bad_key, serde_json::json!({"not": "a cleanup doc"})),
                schedule(model.clone(), CleanupKind::ActionsForDyingUnit, "mysql/0", serde_json::Value::Null),
            ],
            &clock,
        )
        .unwrap();

    let processed = run_cleanups(&store, &clock, &model).unwrap();
    assert_eq!(processed, 1);
    assert!(!needs_cleanup(&store, &model));
}

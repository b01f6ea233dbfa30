use super::*;
use mse_core::ModelUuid;
use mse_store::{FakeClock, Store};

fn provider(app: &str) -> Endpoint {
    Endpoint { application: app.to_string(), role: EndpointRole::Provider, interface: "mysql".into(), scope: EndpointScope::Global }
}

fn requirer(app: &str) -> Endpoint {
    Endpoint { application: app.to_string(), role: EndpointRole::Requirer, interface: "mysql".into(), scope: EndpointScope::Global }
}

#[test]
fn enter_scope_inserts_entry_and_bumps_unit_count() {
    let relation = Relation::new(ModelUuid::new(), 1, provider("mysql"), requirer("wordpress"));
    let ops = enter_scope_ops(&relation, EndpointRole::Requirer, "wordpress/0");
    assert_eq!(ops.len(), 2);
}

#[test]
fn leave_scope_rejects_when_counter_already_zero() {
    let relation = Relation::new(ModelUuid::new(), 1, provider("mysql"), requirer("wordpress"));
    let err = leave_scope_ops(&relation, EndpointRole::Requirer, "wordpress/0").unwrap_err();
    assert!(matches!(err, mse_core::Error::NotValid(_)));
}

#[test]
fn leave_scope_removes_dying_relation_once_empty() {
    let mut relation = Relation::new(ModelUuid::new(), 1, provider("mysql"), requirer("wordpress"));
    relation.unit_count = 1;
    relation.life = Life::Dying;
    let ops = leave_scope_ops(&relation, EndpointRole::Requirer, "wordpress/0").unwrap();
    // scope removal, counter update, relation removal, settings cleanup.
    assert_eq!(ops.len(), 4);
}

#[test]
fn leave_scope_keeps_relation_alive_when_occupants_remain() {
    let mut relation = Relation::new(ModelUuid::new(), 1, provider("mysql"), requirer("wordpress"));
    relation.unit_count = 2;
    let ops = leave_scope_ops(&relation, EndpointRole::Requirer, "wordpress/0").unwrap();
    assert_eq!(ops.len(), 2);
}

#[test]
fn leave_scope_many_aggregates_into_one_counter_update() {
    let mut relation = Relation::new(ModelUuid::new(), 1, provider("mysql"), requirer("wordpress"));
    relation.unit_count = 2;
    let exits = vec![
        (scope_key(relation.model.clone(), 1, EndpointRole::Requirer, "wordpress/0"), EndpointRole::Requirer, "wordpress/0".to_string()),
        (scope_key(relation.model.clone(), 1, EndpointRole::Requirer, "wordpress/1"), EndpointRole::Requirer, "wordpress/1".to_string()),
    ];
    let ops = leave_scope_many_ops(&relation, &exits).unwrap();
    // two scope removals plus exactly one counter update.
    assert_eq!(ops.len(), 3);
    let counter_updates = ops
        .iter()
        .filter(|op| matches!(&op.kind, mse_store::doc::OpKind::Update(doc) if doc.get("unit_count").is_some()))
        .count();
    assert_eq!(counter_updates, 1);
}

#[test]
fn destroy_removes_immediately_when_scope_is_empty() {
    let relation = Relation::new(ModelUuid::new(), 1, provider("mysql"), requirer("wordpress"));
    let ops = destroy_ops(&relation, 0).unwrap();
    assert!(matches!(ops[0].kind, mse_store::doc::OpKind::Remove));
}

#[test]
fn destroy_sets_dying_when_units_remain_in_scope() {
    let mut relation = Relation::new(ModelUuid::new(), 1, provider("mysql"), requirer("wordpress"));
    relation.unit_count = 1;
    let ops = destroy_ops(&relation, 42).unwrap();
    assert_eq!(ops.len(), 1);
    match &ops[0].kind {
        mse_store::doc::OpKind::Update(doc) => assert_eq!(doc["life"], "dying"),
        _ => panic!("expected update"),
    }
}

#[test]
fn find_by_id_scans_model_scoped_relations() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();
    let relation = Relation::new(model.clone(), 7, provider("mysql"), requirer("wordpress"));
    store.commit(vec![relation.create_op()], &clock).unwrap();

    let found = find_by_id(&store, &model, 7).unwrap();
    assert_eq!(found.id, 7);
    assert!(find_by_id(&store, &model, 8).is_none());
}

#[test]
fn cleanup_settings_for_removed_relation_only_touches_matching_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).unwrap();
    let clock = FakeClock::new();
    let model = ModelUuid::new();

    store
        .commit(
            vec![
                Op::insert(settings_key(model.clone(), 1, "riak/0"), serde_json::json!({})),
                Op::insert(settings_key(model.clone(), 2, "riak/1"), serde_json::json!({})),
            ],
            &clock,
        )
        .unwrap();

    let ops = cleanup_settings_for_removed_relation(&store, &model, "1").unwrap();
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0].kind, mse_store::doc::OpKind::Remove));
}

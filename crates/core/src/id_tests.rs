use super::*;
use std::collections::HashMap;

// --- define_id! macro tests ---

crate::define_id! {
    /// Test ID type for macro verification.
    pub struct TestId("tst-");
}

#[test]
fn define_id_hash_map_lookup() {
    let mut map = HashMap::new();
    let id = TestId::new();
    map.insert(id.clone(), 42);
    assert_eq!(map.get(id.as_str()), Some(&42));
}

#[test]
fn define_id_round_trips_through_string() {
    let id = TestId::new();
    let parsed = TestId::from_string(id.as_str());
    assert_eq!(id, parsed);
}

#[test]
fn define_id_short_truncates_the_suffix() {
    let id = TestId::from_string("tst-abcdefghijklmnop");
    assert_eq!(id.short(4), "abcd");
}

#[test]
fn short_fn_on_str() {
    let s = "abcdefghijklmnop";
    assert_eq!(short(s, 8), "abcdefgh");
    assert_eq!(short(s, 100), s);
    assert_eq!(short("abc", 8), "abc");
}

// --- Collection global/model-scoped partition ---

#[test]
fn models_collection_is_global() {
    assert!(Collection::Models.is_global());
    assert!(!Collection::Models.is_model_scoped());
}

#[test]
fn application_collection_is_model_scoped() {
    assert!(Collection::Applications.is_model_scoped());
    assert!(!Collection::Applications.is_global());
}

// --- EntityId / GlobalId display ---

#[test]
fn entity_id_displays_as_model_colon_local() {
    let model = ModelUuid::from_string("mod-abc");
    let id = EntityId::new(model.clone(), Collection::Units, "mysql/0");
    assert_eq!(id.to_string(), format!("{model}:mysql/0"));
}

#[test]
fn global_id_displays_without_model_prefix() {
    let id = GlobalId::new(Collection::ControllerNodes, "node-1");
    assert_eq!(id.to_string(), "node-1");
}

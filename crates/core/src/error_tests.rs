use super::*;

#[test]
fn not_alive_and_not_found_are_idempotent_on_retry() {
    assert!(Error::not_alive("unit/0").is_idempotent_on_retry());
    assert!(Error::not_found("unit/0").is_idempotent_on_retry());
}

#[test]
fn other_kinds_are_not_idempotent_on_retry() {
    assert!(!Error::ExcessiveContention("model-1".into()).is_idempotent_on_retry());
    assert!(!Error::StoreClosed.is_idempotent_on_retry());
    assert!(!Error::Cancelled.is_idempotent_on_retry());
}

#[test]
fn messages_do_not_leak_across_variants() {
    let e = Error::not_found("mysql/0");
    assert_eq!(e.to_string(), "not found: mysql/0");
}

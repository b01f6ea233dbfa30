use super::*;
use crate::config::ServerConfig;

fn test_config(dir: &std::path::Path) -> ServerConfig {
    ServerConfig { state_dir: dir.to_path_buf(), ..ServerConfig::default() }
}

#[test]
fn start_opens_the_store_and_is_reopenable_after_a_clean_stop() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let server = Server::start(config.clone()).unwrap();
    assert!(server.store.find(Collection::Models).is_empty());
    drop(server);

    let reopened = Server::start(config).unwrap();
    assert!(reopened.store.find(Collection::Models).is_empty());
}

#[test]
fn start_fails_while_another_instance_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let _first = Server::start(config.clone()).unwrap();
    let second = Server::start(config);
    assert!(matches!(second, Err(ServerError::LockFailed(_))));
}

#[test]
fn reconciliation_advances_a_quiescent_dying_model_to_dead() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let server = Server::start(config).unwrap();

    let mut model = mse_engine::model::Model::new(ModelUuid::new(), "prod", "alice", "aws", "us-east-1", "aws-cred");
    model.life = mse_core::Life::Dying;
    server.store.commit(model.create_ops(), &server.clock).unwrap();

    server.reconcile_all_models().unwrap();

    let (raw, _) = server.store.get(&mse_engine::model::key(&model.uuid)).unwrap();
    let reloaded: mse_engine::model::Model = serde_json::from_value(raw).unwrap();
    assert_eq!(reloaded.life, mse_core::Life::Dead);
}

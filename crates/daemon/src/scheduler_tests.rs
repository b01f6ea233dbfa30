use super::*;
use crate::config::ServerConfig;
use crate::server::Server;
use std::time::Duration;

#[tokio::test]
async fn scheduler_drains_a_pending_cleanup_without_any_other_caller_touching_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig { state_dir: dir.path().to_path_buf(), cleanup_interval_ms: 20, ..ServerConfig::default() };
    let server = std::sync::Arc::new(Server::start(config).unwrap());

    let model_uuid = ModelUuid::new();
    let model = mse_engine::model::Model::new(model_uuid.clone(), "prod", "alice", "aws", "us-east-1", "aws-cred");
    let unit = mse_engine::unit::Unit::new(model_uuid.clone(), "mysql", 0);
    let mut ops = model.create_ops();
    ops.push(unit.create_op());
    server.store.commit(ops, &server.clock).unwrap();

    let scheduled = mse_engine::schedule(model_uuid.clone(), mse_engine::CleanupKind::ActionsForDyingUnit, "mysql/0", serde_json::Value::Null);
    server.store.commit(vec![scheduled], &server.clock).unwrap();
    assert!(mse_engine::needs_cleanup(&server.store, &model_uuid));

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run(server.clone(), cancel.clone()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    let _ = handle.await;

    assert!(!mse_engine::needs_cleanup(&server.store, &model_uuid));
}

use prepcheck_core::model::{
    CachePolicy, EngineTarget, FailureKind, RunFailure, RunResult, RunStatus, ScenarioState,
};
use prepcheck_core::storage::store::Store;
use tempfile::tempdir;

fn result(version: &str, policy: CachePolicy, status: RunStatus) -> RunResult {
    let failure = (status == RunStatus::Fail).then(|| RunFailure {
        kind: FailureKind::Connection,
        message: "connection refused".into(),
        step_index: None,
        step_description: None,
        sql: None,
        params: vec![],
        expected: None,
        observed: None,
    });
    RunResult {
        target: EngineTarget::mysql(version),
        policy,
        status,
        state_reached: (status == RunStatus::Pass).then_some(ScenarioState::VerifiedDelete),
        failure,
        duration_ms: Some(42),
    }
}

#[test]
fn test_storage_smoke_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("nested").join("prepcheck.db");

    let store = Store::open(&db_path)?;
    store.init_schema()?;
    // Schema creation is repeatable.
    store.init_schema()?;

    let run_id = store.create_run("stmt_cache", &serde_json::json!({ "targets": ["8.0.29"] }))?;
    store.insert_result(run_id, &result("8.0.29", CachePolicy::enabled(), RunStatus::Pass))?;
    store.insert_result(run_id, &result("8.0.29", CachePolicy::disabled(), RunStatus::Fail))?;
    store.finalize_run(run_id, "failed")?;

    let other = store.create_run("other_suite", &serde_json::json!({}))?;
    store.insert_result(other, &result("8.0.28", CachePolicy::enabled(), RunStatus::Pass))?;

    let rows = store.fetch_recent_results("stmt_cache", 10)?;
    assert_eq!(rows.len(), 2);
    // Newest first.
    assert_eq!(rows[0].policy, "disabled");
    assert_eq!(rows[0].status, RunStatus::Fail);
    assert_eq!(rows[0].failure_kind.as_deref(), Some("connection"));
    assert_eq!(rows[1].target, "docker.io/mysql:8.0.29");
    assert_eq!(rows[1].duration_ms, Some(42));

    let conn = store.conn.lock().unwrap();
    let status: String = conn.query_row("SELECT status FROM runs WHERE id = ?1", [run_id], |r| r.get(0))?;
    assert_eq!(status, "failed");
    let state: String = conn.query_row(
        "SELECT state_reached FROM results WHERE run_id = ?1 AND status = 'pass'",
        [run_id],
        |r| r.get(0),
    )?;
    assert_eq!(state, "verified_delete");
    Ok(())
}

#[test]
fn test_fetch_respects_limit() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let run_id = store.create_run("s", &serde_json::json!({}))?;
    for v in ["8.0.26", "8.0.27", "8.0.28", "8.0.29"] {
        store.insert_result(run_id, &result(v, CachePolicy::enabled(), RunStatus::Pass))?;
    }
    let rows = store.fetch_recent_results("s", 3)?;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].target, "docker.io/mysql:8.0.29");
    Ok(())
}

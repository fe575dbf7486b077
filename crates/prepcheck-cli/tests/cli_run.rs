use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn prepcheck(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("prepcheck").unwrap();
    cmd.current_dir(dir).env("PREPCHECK_LOG", "warn");
    cmd
}

#[test]
fn test_memory_run_passes_with_defaults() {
    let dir = tempdir().unwrap();
    prepcheck(dir.path())
        .args(["run", "--provisioner", "memory", "--no-db"])
        .assert()
        .success()
        .stderr(predicate::str::contains("docker.io/mysql:8.0.29 [enabled]"))
        .stderr(predicate::str::contains("docker.io/mysql:8.0.28 [disabled]"))
        .stderr(predicate::str::contains("Summary: 4 passed, 0 failed, 0 divergence(s)"));
}

#[test]
fn test_injected_fault_fails_run_and_reports_divergence() {
    let dir = tempdir().unwrap();
    let junit = dir.path().join("out/junit.xml");
    let json = dir.path().join("out/run.json");

    prepcheck(dir.path())
        .args([
            "run",
            "--provisioner",
            "memory",
            "--target",
            "mysql:8.0.29",
            "--fault",
            "stale-plan-reuse",
            "--no-db",
            "--junit",
            junit.to_str().unwrap(),
            "--json",
            json.to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("diverges"))
        .stderr(predicate::str::contains("verify: rows after delete"))
        .stderr(predicate::str::contains("Summary: 1 passed, 1 failed, 1 divergence(s)"));

    let xml = std::fs::read_to_string(&junit).unwrap();
    assert!(xml.contains(r#"failures="2""#));
    let artifacts: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(artifacts["results"].as_array().unwrap().len(), 2);
    assert_eq!(artifacts["divergences"].as_array().unwrap().len(), 1);
}

#[test]
fn test_fault_requires_memory_provisioner() {
    let dir = tempdir().unwrap();
    prepcheck(dir.path())
        .args(["run", "--provisioner", "container", "--fault", "stale-plan-reuse", "--no-db"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--fault only applies"));
}

#[test]
fn test_bad_target_is_config_error() {
    let dir = tempdir().unwrap();
    prepcheck(dir.path())
        .args(["run", "--provisioner", "memory", "--target", "mysql", "--no-db"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid target 'mysql'"));
}

#[test]
fn test_init_then_run_with_history() {
    let dir = tempdir().unwrap();
    prepcheck(dir.path())
        .args(["init"])
        .assert()
        .success()
        .stderr(predicate::str::contains("created prepcheck.yaml"));
    assert!(dir.path().join("prepcheck.yaml").exists());

    prepcheck(dir.path())
        .args(["run", "--provisioner", "memory", "--policy", "enabled"])
        .assert()
        .success();
    assert!(dir.path().join(".prepcheck/prepcheck.db").exists());

    let re = regex::Regex::new(r"(?m)^1\s+\S+\s+docker\.io/mysql:8\.0\.2[89]\s+enabled\s+pass").unwrap();
    let out = prepcheck(dir.path())
        .args(["history", "--suite", "stmt_cache"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let out = String::from_utf8(out).unwrap();
    assert_eq!(re.find_iter(&out).count(), 2, "{}", out);
}

#[test]
fn test_history_without_db() {
    let dir = tempdir().unwrap();
    prepcheck(dir.path())
        .args(["history"])
        .assert()
        .success()
        .stderr(predicate::str::contains("no history at"));
}

#[test]
fn test_version() {
    let dir = tempdir().unwrap();
    prepcheck(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

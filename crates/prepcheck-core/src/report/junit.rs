use super::RunArtifacts;
use crate::model::RunStatus;
use std::path::Path;

/// One testsuite per run, one testcase per target/policy pair. Divergences
/// become extra failing testcases so CI surfaces them even when every pair
/// passed on its own.
pub fn write_junit(artifacts: &RunArtifacts, out: &Path) -> anyhow::Result<()> {
    let failures = artifacts.failed() + artifacts.divergences.len();
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(
        r#"<testsuite name="{}" tests="{}" failures="{}">"#,
        escape(&artifacts.suite),
        artifacts.results.len() + artifacts.divergences.len(),
        failures
    ));
    xml.push('\n');

    for r in &artifacts.results {
        let time = r
            .duration_ms
            .map(|d| format!(r#" time="{:.3}""#, d as f64 / 1000.0))
            .unwrap_or_default();
        xml.push_str(&format!(
            r#"  <testcase classname="{}" name="{}"{}>"#,
            escape(&r.target.to_string()),
            escape(r.policy.label()),
            time
        ));
        match (r.status, &r.failure) {
            (RunStatus::Pass, _) => {}
            (RunStatus::Fail, Some(f)) => {
                xml.push_str(&format!(
                    r#"<failure type="{}" message="{}">{}</failure>"#,
                    f.kind,
                    escape(&f.message),
                    escape(f.sql.as_deref().unwrap_or_default())
                ));
            }
            (RunStatus::Fail, None) => xml.push_str(r#"<failure message="failed"/>"#),
        }
        xml.push_str("</testcase>\n");
    }

    for d in &artifacts.divergences {
        xml.push_str(&format!(
            r#"  <testcase classname="{}" name="divergence">"#,
            escape(&d.target.to_string())
        ));
        xml.push_str(&format!(
            r#"<failure type="divergence" message="{}"/>"#,
            escape(&format!(
                "{} {} but {} {}",
                d.reference_policy.label(),
                d.reference.status.as_str(),
                d.divergent_policy.label(),
                d.divergent.status.as_str()
            ))
        ));
        xml.push_str("</testcase>\n");
    }

    xml.push_str("</testsuite>\n");
    std::fs::write(out, xml)?;
    Ok(())
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CachePolicy, Divergence, EngineTarget, FailureKind, RunFailure, RunResult, ScenarioState,
    };

    fn result(policy: CachePolicy, failure: Option<RunFailure>) -> RunResult {
        RunResult {
            target: EngineTarget::mysql("8.0.29"),
            policy,
            status: if failure.is_some() {
                RunStatus::Fail
            } else {
                RunStatus::Pass
            },
            state_reached: Some(ScenarioState::Deleted),
            failure,
            duration_ms: Some(1200),
        }
    }

    #[test]
    fn test_junit_output_structure() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("junit.xml");

        let failure = RunFailure {
            kind: FailureKind::AssertionMismatch,
            message: "row count mismatch at step 14: expected 0 row(s), observed 1".into(),
            step_index: Some(14),
            step_description: Some("verify: rows after delete".into()),
            sql: Some("SELECT * FROM Book WHERE title <> \"x\"".into()),
            params: vec![],
            expected: Some(vec![]),
            observed: Some(vec![]),
        };
        let pass = result(CachePolicy::disabled(), None);
        let fail = result(CachePolicy::enabled(), Some(failure));
        let artifacts = RunArtifacts {
            suite: "demo".into(),
            run_id: None,
            divergences: vec![Divergence {
                target: fail.target.clone(),
                reference_policy: fail.policy.clone(),
                reference: fail.outcome(),
                divergent_policy: pass.policy.clone(),
                divergent: pass.outcome(),
            }],
            results: vec![fail, pass],
        };

        write_junit(&artifacts, &path).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains(r#"<testsuite name="demo" tests="3" failures="2">"#));
        assert!(content.contains(
            r#"<testcase classname="docker.io/mysql:8.0.29" name="disabled" time="1.200"></testcase>"#
        ));
        assert!(content.contains(r#"<failure type="assertion_mismatch""#));
        assert!(content.contains("&quot;x&quot;"));
        assert!(content.contains(r#"name="divergence""#));
        assert!(content.contains("enabled fail but disabled pass"));
    }
}

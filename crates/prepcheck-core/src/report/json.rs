use super::RunArtifacts;
use std::path::Path;

pub fn write_json(artifacts: &RunArtifacts, out: &Path) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(artifacts)?;
    std::fs::write(out, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_artifact_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let artifacts = RunArtifacts {
            suite: "stmt_cache".into(),
            run_id: None,
            results: vec![],
            divergences: vec![],
        };
        write_json(&artifacts, &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("run_id"));
        let back: RunArtifacts = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, artifacts);
    }
}

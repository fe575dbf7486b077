use prepcheck_core::engine::runner::{Runner, RunnerSettings};
use prepcheck_core::executor::memory::{Fault, MemoryBackend, MemoryFaults};
use prepcheck_core::model::{CachePolicy, EngineTarget};
use prepcheck_core::scenario::{cache_boundary, ScenarioConfig};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_divergence_emits_structured_events() -> anyhow::Result<()> {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let buffer_clone = buffer.clone();

    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_writer(move || MockWriter(buffer_clone.clone()))
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = Arc::new(MemoryBackend::new(false).with_faults(MemoryFaults::default().with(Fault::StalePlanReuse)));
    let runner = Runner {
        provisioner: backend.clone(),
        connector: backend.clone(),
        settings: RunnerSettings::default(),
        store: None,
    };
    runner
        .run_matrix(
            "stmt_cache",
            &[EngineTarget::mysql("8.0.29")],
            &CachePolicy::standard_pair(),
            &cache_boundary(&ScenarioConfig::default()),
        )
        .await?;

    let output = String::from_utf8(buffer.lock().unwrap().clone())?;
    assert!(output.contains("\"event\":\"prepcheck.run.started\""));
    assert!(output.contains("\"event\":\"prepcheck.scenario.failed\""));
    assert!(output.contains("\"kind\":\"assertion_mismatch\""));
    assert!(output.contains("\"event\":\"prepcheck.run.divergence\""));
    assert!(output.contains("\"reference\":\"enabled\""));
    assert!(output.contains("\"divergent\":\"disabled\""));
    assert!(output.contains("\"timestamp\""));
    Ok(())
}

struct MockWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for MockWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

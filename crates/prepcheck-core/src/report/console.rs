use super::RunArtifacts;
use crate::compare::render_rows;
use crate::model::{RunResult, RunStatus};

pub fn print_summary(artifacts: &RunArtifacts) {
    eprintln!("\nRan {} target/policy pairs...", artifacts.results.len());

    let mut pass = 0;
    let mut fail = 0;
    for r in &artifacts.results {
        let duration = r
            .duration_ms
            .map(|d| format!("({:.1}s)", d as f64 / 1000.0))
            .unwrap_or_default();
        let reached = r.state_reached.map(|s| s.as_str()).unwrap_or("none");

        match r.status {
            RunStatus::Pass => {
                pass += 1;
                eprintln!("✅ {:<40} PASS  {}", r.id(), duration);
            }
            RunStatus::Fail => {
                fail += 1;
                eprintln!("❌ {:<40} FAIL  {}", r.id(), duration);
                print_failure(r, reached);
            }
        }
    }

    for d in &artifacts.divergences {
        eprintln!(
            "⚠️  {} diverges: {} -> {:?}, {} -> {:?}",
            d.target,
            d.reference_policy.label(),
            d.reference.status,
            d.divergent_policy.label(),
            d.divergent.status
        );
        if let Some(step) = d.divergent.failing_step.or(d.reference.failing_step) {
            eprintln!("    first failing step: {}", step);
        }
    }

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!(
        "Summary: {} passed, {} failed, {} divergence(s)",
        pass,
        fail,
        artifacts.divergences.len()
    );
}

fn print_failure(r: &RunResult, reached: &str) {
    let Some(f) = &r.failure else {
        return;
    };
    eprintln!("    {}: {}", f.kind, f.message);
    eprintln!("    last state: {}", reached);
    if let (Some(i), Some(desc)) = (f.step_index, &f.step_description) {
        eprintln!("    step {}: {}", i, desc);
    }
    if let Some(sql) = &f.sql {
        eprintln!("      → {}", sql);
        if !f.params.is_empty() {
            let bound: Vec<String> = f.params.iter().map(|p| p.to_string()).collect();
            eprintln!("      → params: [{}]", bound.join(", "));
        }
    }
    if let (Some(expected), Some(observed)) = (&f.expected, &f.observed) {
        eprintln!("      expected: {}", render_rows(expected));
        eprintln!("      observed: {}", render_rows(observed));
    }
}

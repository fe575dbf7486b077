use crate::compare::compare;
use crate::config::Settings;
use crate::errors::HarnessError;
use crate::executor::{Connector, Executor, StepOutcome};
use crate::model::{
    CachePolicy, Divergence, EngineTarget, FailureKind, RunFailure, RunResult, RunStatus, Scenario,
    ScenarioState, ScenarioStep,
};
use crate::provision::{ConnectionParams, Provisioner};
use crate::report::RunArtifacts;
use crate::storage::store::Store;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub parallel: usize,
    pub provision_timeout: Duration,
    pub statement_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for RunnerSettings {
    fn from(s: &Settings) -> Self {
        Self {
            parallel: s.parallel(),
            provision_timeout: s.provision_timeout(),
            statement_timeout: s.statement_timeout(),
        }
    }
}

/// Drives a scenario across every (target, policy) pair.
pub struct Runner {
    pub provisioner: Arc<dyn Provisioner>,
    pub connector: Arc<dyn Connector>,
    pub settings: RunnerSettings,
    pub store: Option<Store>,
}

// What a per-target task needs, detached from the runner's lifetime.
struct TargetTask {
    provisioner: Arc<dyn Provisioner>,
    connector: Arc<dyn Connector>,
    settings: RunnerSettings,
    scenario: Arc<Scenario>,
    policies: Arc<Vec<CachePolicy>>,
}

impl Runner {
    pub async fn run_matrix(
        &self,
        suite: &str,
        targets: &[EngineTarget],
        policies: &[CachePolicy],
        scenario: &Scenario,
    ) -> anyhow::Result<RunArtifacts> {
        let run_id = self.store.as_ref().and_then(|store| {
            let config = serde_json::json!({
                "targets": targets,
                "policies": policies,
                "scenario": scenario.name,
                "provisioner": self.provisioner.name(),
                "connector": self.connector.name(),
            });
            store
                .create_run(suite, &config)
                .map_err(|e| store_write_failed("create_run", &e))
                .ok()
        });
        tracing::info!(
            event = "prepcheck.run.started",
            suite,
            targets = targets.len(),
            policies = policies.len(),
            provisioner = self.provisioner.name(),
        );

        let scenario = Arc::new(scenario.clone());
        let shared_policies = Arc::new(policies.to_vec());
        let sem = Arc::new(Semaphore::new(self.settings.parallel.max(1)));
        let mut handles = Vec::new();

        for target in targets {
            let permit = sem.clone().acquire_owned().await?;
            let task = self.clone_for_task(scenario.clone(), shared_policies.clone());
            let t = target.clone();
            let h = tokio::spawn(async move {
                let _permit = permit;
                task.run_target(t).await
            });
            handles.push((target.clone(), h));
        }

        let mut results = Vec::with_capacity(targets.len() * policies.len());
        for (target, h) in handles {
            match h.await {
                Ok(rows) => results.extend(rows),
                Err(e) => {
                    tracing::error!(event = "prepcheck.run.task_failed", target = %target, error = %e);
                    let err = HarnessError::connection(format!("task aborted: {}", e));
                    results.extend(
                        policies
                            .iter()
                            .map(|p| failed_result(&target, p, failure(&err, None), None, None)),
                    );
                }
            }
        }

        let divergences = find_divergences(&results);
        for d in &divergences {
            tracing::warn!(
                event = "prepcheck.run.divergence",
                target = %d.target,
                reference = d.reference_policy.label(),
                divergent = d.divergent_policy.label(),
            );
        }

        let artifacts = RunArtifacts {
            suite: suite.to_string(),
            run_id,
            results,
            divergences,
        };
        if let (Some(store), Some(id)) = (&self.store, run_id) {
            persist(store, id, &artifacts);
        }

        tracing::info!(
            event = "prepcheck.run.finished",
            suite,
            failed = artifacts.failed(),
            divergences = artifacts.divergences.len(),
        );
        Ok(artifacts)
    }

    fn clone_for_task(&self, scenario: Arc<Scenario>, policies: Arc<Vec<CachePolicy>>) -> TargetTask {
        TargetTask {
            provisioner: self.provisioner.clone(),
            connector: self.connector.clone(),
            settings: self.settings.clone(),
            scenario,
            policies,
        }
    }
}

impl TargetTask {
    async fn run_target(self, target: EngineTarget) -> Vec<RunResult> {
        let started = Instant::now();
        let provisioned = timeout(
            self.settings.provision_timeout,
            self.provisioner.provision(&target),
        )
        .await;

        let params = match provisioned {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => return self.fail_all(&target, HarnessError::provisioning(format!("{:#}", e)), started),
            Err(_) => {
                return self.fail_all(
                    &target,
                    HarnessError::timeout("provisioning", self.settings.provision_timeout),
                    started,
                )
            }
        };

        // Policies share the instance, so they run one after another.
        let mut results = Vec::with_capacity(self.policies.len());
        for policy in self.policies.iter() {
            results.push(
                run_scenario(
                    &self.connector,
                    &params,
                    &target,
                    policy,
                    &self.scenario,
                    self.settings.statement_timeout,
                )
                .await,
            );
        }

        let released = timeout(self.settings.provision_timeout, self.provisioner.release(&params)).await;
        let error = match released {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(_) => Some(HarnessError::timeout("release", self.settings.provision_timeout).message),
        };
        if let Some(error) = error {
            tracing::warn!(
                event = "prepcheck.provision.release_failed",
                target = %target,
                instance = %params.instance_id,
                error = %error,
            );
        }
        results
    }

    fn fail_all(&self, target: &EngineTarget, err: HarnessError, started: Instant) -> Vec<RunResult> {
        tracing::error!(event = "prepcheck.provision.failed", target = %target, error = %err);
        let elapsed = started.elapsed().as_millis() as u64;
        self.policies
            .iter()
            .map(|p| failed_result(target, p, failure(&err, None), None, Some(elapsed)))
            .collect()
    }
}

/// Runs every step of `scenario` once over a fresh connection.
///
/// Never returns an error: anything that goes wrong ends up in the
/// result's [`RunFailure`]. The connection is closed on every path.
pub async fn run_scenario(
    connector: &Arc<dyn Connector>,
    params: &ConnectionParams,
    target: &EngineTarget,
    policy: &CachePolicy,
    scenario: &Scenario,
    statement_timeout: Duration,
) -> RunResult {
    let started = Instant::now();
    let mut reached = None;

    let outcome = match Executor::open(connector, params, policy, statement_timeout).await {
        Err(e) => Err(failure(&e, None)),
        Ok(mut exec) => {
            let outcome = drive(&mut exec, scenario, &mut reached).await;
            if let Err(e) = exec.close().await {
                tracing::warn!(
                    event = "prepcheck.executor.close_failed",
                    target = %target,
                    policy = policy.label(),
                    error = %format!("{:#}", e),
                );
            }
            outcome
        }
    };
    let elapsed = Some(started.elapsed().as_millis() as u64);

    match outcome {
        Ok(()) => {
            tracing::info!(
                event = "prepcheck.scenario.passed",
                target = %target,
                policy = policy.label(),
                state = reached.map(|s| s.as_str()).unwrap_or("none"),
            );
            RunResult {
                target: target.clone(),
                policy: policy.clone(),
                status: RunStatus::Pass,
                state_reached: reached,
                failure: None,
                duration_ms: elapsed,
            }
        }
        Err(f) => {
            tracing::warn!(
                event = "prepcheck.scenario.failed",
                target = %target,
                policy = policy.label(),
                kind = f.kind.as_str(),
                step = ?f.step_index,
                message = %f.message,
            );
            failed_result(target, policy, f, reached, elapsed)
        }
    }
}

async fn drive(
    exec: &mut Executor,
    scenario: &Scenario,
    reached: &mut Option<ScenarioState>,
) -> Result<(), RunFailure> {
    for (index, step) in scenario.steps.iter().enumerate() {
        tracing::debug!(event = "prepcheck.step", step = index, description = %step.description);
        let outcome = exec.run(index, step).await.map_err(|e| failure(&e, Some(step)))?;

        if let (Some(expected), StepOutcome::Completed(obs)) = (&step.checkpoint, &outcome) {
            compare(index, expected, &obs.rows).map_err(|m| RunFailure {
                kind: FailureKind::AssertionMismatch,
                message: m.message(),
                step_index: Some(index),
                step_description: Some(step.description.clone()),
                sql: Some(step.sql.clone()),
                params: step.params.clone(),
                expected: Some(m.expected),
                observed: Some(m.observed),
            })?;
        }
        if let Some(state) = step.enters {
            *reached = Some(state);
        }
    }
    Ok(())
}

// History is a side channel: a store error is logged and the run's results
// are still returned.
fn persist(store: &Store, run_id: i64, artifacts: &RunArtifacts) {
    let written = artifacts
        .results
        .iter()
        .try_for_each(|r| store.insert_result(run_id, r))
        .and_then(|()| {
            artifacts
                .divergences
                .iter()
                .try_for_each(|d| store.insert_divergence(run_id, d))
        });
    if let Err(e) = written {
        store_write_failed("insert", &e);
    }
    let status = if artifacts.ok() { "passed" } else { "failed" };
    if let Err(e) = store.finalize_run(run_id, status) {
        store_write_failed("finalize_run", &e);
    }
}

fn store_write_failed(op: &str, err: &anyhow::Error) {
    tracing::error!(event = "prepcheck.store.write_failed", op, error = %format!("{:#}", err));
}

fn failure(err: &HarnessError, step: Option<&ScenarioStep>) -> RunFailure {
    RunFailure {
        kind: err.kind,
        message: err.message.clone(),
        step_index: err.step_index,
        step_description: step.map(|s| s.description.clone()),
        sql: err.sql.clone(),
        params: err.params.clone(),
        expected: None,
        observed: None,
    }
}

fn failed_result(
    target: &EngineTarget,
    policy: &CachePolicy,
    failure: RunFailure,
    reached: Option<ScenarioState>,
    duration_ms: Option<u64>,
) -> RunResult {
    RunResult {
        target: target.clone(),
        policy: policy.clone(),
        status: RunStatus::Fail,
        state_reached: reached,
        failure: Some(failure),
        duration_ms,
    }
}

/// Pairs whose outcome differs from the first policy run on the same target.
pub fn find_divergences(results: &[RunResult]) -> Vec<Divergence> {
    let mut out = Vec::new();
    let mut seen: Vec<&EngineTarget> = Vec::new();

    for r in results {
        if seen.contains(&&r.target) {
            continue;
        }
        seen.push(&r.target);
        let mut same_target = results.iter().filter(|o| o.target == r.target);
        let Some(reference) = same_target.next() else {
            continue;
        };
        for other in same_target {
            if other.outcome() != reference.outcome() {
                out.push(Divergence {
                    target: r.target.clone(),
                    reference_policy: reference.policy.clone(),
                    reference: reference.outcome(),
                    divergent_policy: other.policy.clone(),
                    divergent: other.outcome(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(version: &str, policy: CachePolicy, failing_step: Option<usize>) -> RunResult {
        let failure = failing_step.map(|i| RunFailure {
            kind: FailureKind::AssertionMismatch,
            message: "mismatch".into(),
            step_index: Some(i),
            step_description: None,
            sql: None,
            params: vec![],
            expected: None,
            observed: None,
        });
        RunResult {
            target: EngineTarget::mysql(version),
            policy,
            status: if failure.is_some() {
                RunStatus::Fail
            } else {
                RunStatus::Pass
            },
            state_reached: Some(ScenarioState::Deleted),
            failure,
            duration_ms: Some(3),
        }
    }

    #[test]
    fn test_no_divergence_when_outcomes_match() {
        let results = vec![
            result("8.0.29", CachePolicy::enabled(), Some(14)),
            result("8.0.29", CachePolicy::disabled(), Some(14)),
            result("8.0.28", CachePolicy::enabled(), None),
            result("8.0.28", CachePolicy::disabled(), None),
        ];
        assert!(find_divergences(&results).is_empty());
    }

    #[test]
    fn test_divergence_is_per_target() {
        let results = vec![
            result("8.0.29", CachePolicy::enabled(), Some(14)),
            result("8.0.29", CachePolicy::disabled(), None),
            result("8.0.28", CachePolicy::enabled(), None),
            result("8.0.28", CachePolicy::disabled(), None),
        ];
        let d = find_divergences(&results);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].target, EngineTarget::mysql("8.0.29"));
        assert_eq!(d[0].reference_policy, CachePolicy::enabled());
        assert_eq!(d[0].reference.failing_step, Some(14));
        assert_eq!(d[0].divergent.status, RunStatus::Pass);
    }

    #[test]
    fn test_durations_do_not_count_as_divergence() {
        let mut slow = result("8.0.29", CachePolicy::disabled(), None);
        slow.duration_ms = Some(9000);
        let results = vec![result("8.0.29", CachePolicy::enabled(), None), slow];
        assert!(find_divergences(&results).is_empty());
    }
}

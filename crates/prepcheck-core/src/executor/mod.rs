use crate::errors::HarnessError;
use crate::model::{CachePolicy, ConnectionOptions, FailureKind, Observation, ScenarioStep, Value};
use crate::provision::ConnectionParams;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub mod memory;
pub mod mysql;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        params: &ConnectionParams,
        options: &ConnectionOptions,
    ) -> anyhow::Result<Box<dyn Session>>;
    fn name(&self) -> &'static str;
}

/// One autocommit connection. Implementations release their own prepared
/// statements according to the options they were opened with.
#[async_trait]
pub trait Session: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> anyhow::Result<Observation>;
    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed(Observation),
    /// The step was declared to fail and did.
    FailedAsExpected(String),
}

/// Runs scenario steps over a single connection opened with a cache policy.
pub struct Executor {
    session: Option<Box<dyn Session>>,
    statement_timeout: Duration,
}

impl Executor {
    pub async fn open(
        connector: &Arc<dyn Connector>,
        params: &ConnectionParams,
        policy: &CachePolicy,
        statement_timeout: Duration,
    ) -> Result<Self, HarnessError> {
        let options = policy.connection_options();
        let session = match timeout(statement_timeout, connector.connect(params, &options)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(HarnessError::connection(format!(
                    "{} connect to {} failed: {:#}",
                    connector.name(),
                    params.address(),
                    e
                )))
            }
            Err(_) => return Err(HarnessError::timeout("connect", statement_timeout)),
        };

        tracing::debug!(
            event = "prepcheck.executor.opened",
            connector = connector.name(),
            address = %params.address(),
            options = ?options,
        );
        Ok(Self {
            session: Some(session),
            statement_timeout,
        })
    }

    pub async fn run(&mut self, index: usize, step: &ScenarioStep) -> Result<StepOutcome, HarnessError> {
        let session = self.session.as_mut().ok_or_else(|| {
            HarnessError::connection("executor already closed").at_step(index, &step.sql, &step.params)
        })?;

        let result = timeout(self.statement_timeout, session.execute(&step.sql, &step.params)).await;
        match result {
            Err(_) => Err(HarnessError::timeout("statement", self.statement_timeout).at_step(
                index,
                &step.sql,
                &step.params,
            )),
            Ok(Ok(obs)) if !step.expect_error => Ok(StepOutcome::Completed(obs)),
            Ok(Ok(_)) => Err(HarnessError::new(
                FailureKind::StatementExecution,
                "statement succeeded but an error was expected",
            )
            .at_step(index, &step.sql, &step.params)),
            Ok(Err(e)) if step.expect_error => Ok(StepOutcome::FailedAsExpected(format!("{:#}", e))),
            Ok(Err(e)) => Err(
                HarnessError::new(FailureKind::StatementExecution, format!("{:#}", e)).at_step(
                    index,
                    &step.sql,
                    &step.params,
                ),
            ),
        }
    }

    /// Closes the session, giving up after the statement timeout. A session
    /// that does not close in time is dropped.
    pub async fn close(mut self) -> anyhow::Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        match timeout(self.statement_timeout, session.close()).await {
            Ok(closed) => closed,
            Err(_) => Err(HarnessError::timeout("close", self.statement_timeout).into()),
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Dropping the session still tears the connection down, just without
        // waiting for the server to acknowledge.
        if self.session.is_some() {
            tracing::warn!(event = "prepcheck.executor.dropped_open", "executor dropped without close");
        }
    }
}

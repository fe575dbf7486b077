use crate::model::{FailureKind, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

/// A failure while driving one scenario run.
///
/// Carries the statement and its bindings whenever one was involved so a
/// failing run can be replayed by hand.
#[derive(Debug, Clone)]
pub struct HarnessError {
    pub kind: FailureKind,
    pub message: String,
    pub step_index: Option<usize>,
    pub sql: Option<String>,
    pub params: Vec<Value>,
}

impl HarnessError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            step_index: None,
            sql: None,
            params: vec![],
        }
    }

    pub fn provisioning(err: impl fmt::Display) -> Self {
        Self::new(FailureKind::Provisioning, err.to_string())
    }

    pub fn connection(err: impl fmt::Display) -> Self {
        Self::new(FailureKind::Connection, err.to_string())
    }

    pub fn timeout(what: &str, after: std::time::Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("{} timed out after {:.1}s", what, after.as_secs_f64()),
        )
    }

    pub fn at_step(mut self, index: usize, sql: &str, params: &[Value]) -> Self {
        self.step_index = Some(index);
        self.sql = Some(sql.to_string());
        self.params = params.to_vec();
        self
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(i) = self.step_index {
            write!(f, " (step {})", i)?;
        }
        Ok(())
    }
}

impl std::error::Error for HarnessError {}

use crate::model::{Divergence, RunResult};
use serde::{Deserialize, Serialize};

pub mod console;
pub mod json;
pub mod junit;

/// Everything one matrix run produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunArtifacts {
    pub suite: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    pub results: Vec<RunResult>,
    #[serde(default)]
    pub divergences: Vec<Divergence>,
}

impl RunArtifacts {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.passed()).count()
    }

    /// True when every pair passed and no policies disagreed.
    pub fn ok(&self) -> bool {
        self.failed() == 0 && self.divergences.is_empty()
    }
}

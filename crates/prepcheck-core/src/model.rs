use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A database build to provision, e.g. `docker.io/mysql:8.0.29`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineTarget {
    #[serde(default = "default_registry")]
    pub registry: String,
    pub image: String,
    pub version: String,
}

fn default_registry() -> String {
    "docker.io".into()
}

impl EngineTarget {
    pub fn new(registry: &str, image: &str, version: &str) -> Self {
        Self {
            registry: registry.into(),
            image: image.into(),
            version: version.into(),
        }
    }

    pub fn mysql(version: &str) -> Self {
        Self::new("docker.io", "mysql", version)
    }

    /// `registry/image`, without the tag.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.registry, self.image)
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.repository(), self.version)
    }
}

impl fmt::Display for EngineTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image_ref())
    }
}

impl FromStr for EngineTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (repo, version) = s
            .rsplit_once(':')
            .filter(|(repo, version)| !repo.is_empty() && !version.is_empty() && !version.contains('/'))
            .ok_or_else(|| format!("invalid target '{}': expected [registry/]image:version", s))?;

        // A leading component is only a registry if it looks like a host.
        let (registry, image) = match repo.split_once('/') {
            Some((head, rest)) if head.contains('.') || head.contains(':') || head == "localhost" => {
                (head.to_string(), rest.to_string())
            }
            _ => (default_registry(), repo.to_string()),
        };
        if image.is_empty() {
            return Err(format!("invalid target '{}': empty image name", s));
        }

        Ok(Self {
            registry,
            image,
            version: version.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    Enabled,
    Disabled,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Enabled => "enabled",
            CacheMode::Disabled => "disabled",
        }
    }
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" | "on" | "true" => Ok(CacheMode::Enabled),
            "disabled" | "off" | "false" => Ok(CacheMode::Disabled),
            other => Err(format!("unknown cache mode '{}' (expected enabled|disabled)", other)),
        }
    }
}

pub const DEFAULT_CACHE_SQL_LIMIT: usize = 2048;

/// Client-side statement caching policy for one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CachePolicy {
    pub mode: CacheMode,
    #[serde(default = "default_true")]
    pub use_server_prepared_statements: bool,
    /// Longest statement text (bytes) the client keeps in its cache.
    #[serde(default = "default_cache_sql_limit")]
    pub prepared_statement_cache_size_limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_sql_limit() -> usize {
    DEFAULT_CACHE_SQL_LIMIT
}

impl CachePolicy {
    pub fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            use_server_prepared_statements: true,
            prepared_statement_cache_size_limit: DEFAULT_CACHE_SQL_LIMIT,
        }
    }

    pub fn enabled() -> Self {
        Self::new(CacheMode::Enabled)
    }

    pub fn disabled() -> Self {
        Self::new(CacheMode::Disabled)
    }

    pub fn standard_pair() -> Vec<Self> {
        vec![Self::enabled(), Self::disabled()]
    }

    pub fn label(&self) -> &'static str {
        self.mode.as_str()
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            use_server_prepared_statements: self.use_server_prepared_statements,
            cache_prepared_statements: self.mode == CacheMode::Enabled,
            prepared_statement_cache_size_limit: self.prepared_statement_cache_size_limit,
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cache={} server_prep={} sql_limit={}",
            self.label(),
            self.use_server_prepared_statements,
            self.prepared_statement_cache_size_limit
        )
    }
}

/// Driver-level knobs derived from a [`CachePolicy`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    pub use_server_prepared_statements: bool,
    pub cache_prepared_statements: bool,
    pub prepared_statement_cache_size_limit: usize,
}

impl ConnectionOptions {
    /// Whether a statement with this text may be kept in the client cache.
    pub fn caches(&self, sql: &str) -> bool {
        self.use_server_prepared_statements
            && self.cache_prepared_statements
            && sql.len() <= self.prepared_statement_cache_size_limit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

pub type Row = BTreeMap<String, Value>;

pub fn row<K: Into<String>>(cells: impl IntoIterator<Item = (K, Value)>) -> Row {
    cells.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// What a single statement produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub rows: Vec<Row>,
    pub affected_rows: u64,
}

/// Forward-only progress markers of the cache-boundary scenario.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Created,
    Seeded,
    Updated,
    VerifiedUpdate,
    Deleted,
    VerifiedDelete,
}

impl ScenarioState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioState::Created => "created",
            ScenarioState::Seeded => "seeded",
            ScenarioState::Updated => "updated",
            ScenarioState::VerifiedUpdate => "verified_update",
            ScenarioState::Deleted => "deleted",
            ScenarioState::VerifiedDelete => "verified_delete",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExpectedState {
    pub rows: Vec<Row>,
    #[serde(default)]
    pub ordered: bool,
}

impl ExpectedState {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ordered: false,
        }
    }

    pub fn empty() -> Self {
        Self::rows(vec![])
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioStep {
    pub description: String,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<ExpectedState>,
    #[serde(default)]
    pub expect_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enters: Option<ScenarioState>,
}

impl ScenarioStep {
    pub fn new(description: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sql: sql.into(),
            params: vec![],
            checkpoint: None,
            expect_error: false,
            enters: None,
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn expect(mut self, state: ExpectedState) -> Self {
        self.checkpoint = Some(state);
        self
    }

    pub fn expect_error(mut self) -> Self {
        self.expect_error = true;
        self
    }

    pub fn enters(mut self, state: ScenarioState) -> Self {
        self.enters = Some(state);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub name: String,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pass,
    Fail,
}

impl RunStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "pass" => RunStatus::Pass,
            _ => RunStatus::Fail,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pass => "pass",
            RunStatus::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provisioning,
    Connection,
    StatementExecution,
    AssertionMismatch,
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Provisioning => "provisioning",
            FailureKind::Connection => "connection",
            FailureKind::StatementExecution => "statement_execution",
            FailureKind::AssertionMismatch => "assertion_mismatch",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<Row>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<Vec<Row>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub target: EngineTarget,
    pub policy: CachePolicy,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_reached: Option<ScenarioState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub duration_ms: Option<u64>,
}

impl RunResult {
    pub fn id(&self) -> String {
        format!("{} [{}]", self.target, self.policy.label())
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Pass
    }

    /// The part of a result that must be reproducible: no timings.
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            status: self.status,
            state_reached: self.state_reached,
            failure_kind: self.failure.as_ref().map(|f| f.kind),
            failing_step: self.failure.as_ref().and_then(|f| f.step_index),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state_reached: Option<ScenarioState>,
    pub failure_kind: Option<FailureKind>,
    pub failing_step: Option<usize>,
}

/// Two cache policies of one target that disagree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Divergence {
    pub target: EngineTarget,
    pub reference_policy: CachePolicy,
    pub reference: RunOutcome,
    pub divergent_policy: CachePolicy,
    pub divergent: RunOutcome,
}

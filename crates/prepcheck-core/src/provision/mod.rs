use crate::model::EngineTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod container;

/// Where a provisioned instance can be reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub database: Option<String>,
    /// Release is a no-op when set; the instance outlives this run.
    pub reuse: bool,
    pub instance_id: String,
}

impl ConnectionParams {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns only once the instance accepts connections.
    async fn provision(&self, target: &EngineTarget) -> anyhow::Result<ConnectionParams>;
    async fn release(&self, params: &ConnectionParams) -> anyhow::Result<()>;
    fn name(&self) -> &'static str;
}

use super::{ConnectionParams, Provisioner};
use crate::model::EngineTarget;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::mysql::Mysql;

const MYSQL_PORT: u16 = 3306;

/// Starts one MySQL container per target through the local Docker daemon.
///
/// With `reuse` set, a container started for an image is handed out again for
/// the same image and only stopped when the provisioner is dropped.
pub struct ContainerProvisioner {
    reuse: bool,
    startup_timeout: Duration,
    containers: Mutex<HashMap<String, ContainerAsync<Mysql>>>,
    by_image: Mutex<HashMap<String, ConnectionParams>>,
    next_id: AtomicU64,
}

impl ContainerProvisioner {
    pub fn new(reuse: bool, startup_timeout: Duration) -> Self {
        Self {
            reuse,
            startup_timeout,
            containers: Mutex::new(HashMap::new()),
            by_image: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn containers(&self) -> anyhow::Result<MutexGuard<'_, HashMap<String, ContainerAsync<Mysql>>>> {
        self.containers
            .lock()
            .map_err(|_| anyhow!("container registry lock poisoned"))
    }

    fn reusable(&self, image: &str) -> anyhow::Result<Option<ConnectionParams>> {
        if !self.reuse {
            return Ok(None);
        }
        let by_image = self
            .by_image
            .lock()
            .map_err(|_| anyhow!("container registry lock poisoned"))?;
        Ok(by_image.get(image).cloned())
    }
}

#[async_trait]
impl Provisioner for ContainerProvisioner {
    async fn provision(&self, target: &EngineTarget) -> anyhow::Result<ConnectionParams> {
        let image = target.image_ref();
        if let Some(params) = self.reusable(&image)? {
            tracing::info!(event = "prepcheck.provision.reused", image = %image, instance = %params.instance_id);
            return Ok(params);
        }

        tracing::info!(event = "prepcheck.provision.starting", image = %image);
        let container = Mysql::default()
            .with_name(target.repository())
            .with_tag(target.version.clone())
            .with_startup_timeout(self.startup_timeout)
            .start()
            .await
            .with_context(|| format!("failed to start container for {}", image))?;

        let host = container
            .get_host()
            .await
            .with_context(|| format!("no host for container {}", container.id()))?;
        let port = container
            .get_host_port_ipv4(MYSQL_PORT)
            .await
            .with_context(|| format!("port {} not mapped for container {}", MYSQL_PORT, container.id()))?;

        let params = ConnectionParams {
            host: host.to_string(),
            port,
            user: "root".into(),
            password: None,
            database: Some("test".into()),
            reuse: self.reuse,
            instance_id: format!(
                "{}-{}",
                container.id(),
                self.next_id.fetch_add(1, Ordering::SeqCst)
            ),
        };
        tracing::info!(
            event = "prepcheck.provision.ready",
            image = %image,
            address = %params.address(),
            instance = %params.instance_id,
        );

        self.containers()?.insert(params.instance_id.clone(), container);
        if self.reuse {
            self.by_image
                .lock()
                .map_err(|_| anyhow!("container registry lock poisoned"))?
                .insert(image, params.clone());
        }
        Ok(params)
    }

    async fn release(&self, params: &ConnectionParams) -> anyhow::Result<()> {
        if params.reuse {
            return Ok(());
        }
        let container = self
            .containers()?
            .remove(&params.instance_id)
            .ok_or_else(|| anyhow!("unknown container instance '{}'", params.instance_id))?;
        container
            .rm()
            .await
            .with_context(|| format!("failed to remove container {}", params.instance_id))?;
        tracing::info!(event = "prepcheck.provision.released", instance = %params.instance_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

//! Process-backed pool manager

use crate::command::{self, Invocation, ToolConfig};
use crate::error::ToolError;
use crate::pool_trait::PoolManager;
use tracing::info;

/// Runs `zpool` / `zfs` on the local node
#[derive(Debug, Clone, Default)]
pub struct ZfsDriver {
    config: ToolConfig,
}

impl ZfsDriver {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    async fn zpool(&self, args: Vec<String>) -> Result<String, ToolError> {
        Invocation::new(self.config.use_sudo, &self.config.zpool, args)
            .run(self.config.timeout)
            .await
    }

    async fn zfs(&self, args: Vec<String>) -> Result<String, ToolError> {
        Invocation::new(self.config.use_sudo, &self.config.zfs, args)
            .run(self.config.timeout)
            .await
    }
}

#[async_trait::async_trait]
impl PoolManager for ZfsDriver {
    async fn import_pool(&self, pool_name: &str, cache_file: Option<&str>) -> Result<(), ToolError> {
        self.zpool(command::import_args(pool_name, cache_file)?).await?;
        info!("Imported pool {}", pool_name);
        Ok(())
    }

    async fn create_pool(&self, pool_name: &str, cache_file: Option<&str>, disks: &[String]) -> Result<(), ToolError> {
        self.zpool(command::create_pool_args(pool_name, cache_file, disks)?)
            .await?;
        info!("Created pool {} on {:?}", pool_name, disks);
        Ok(())
    }

    async fn create_volume(&self, full_name: &str, capacity: &str) -> Result<(), ToolError> {
        self.zfs(command::create_volume_args(full_name, capacity)?).await?;
        info!("Created volume {} ({})", full_name, capacity);
        Ok(())
    }

    async fn get_pool_name(&self) -> Result<String, ToolError> {
        let output = self.zpool(vec!["status".to_string()]).await?;
        command::parse_pool_name(&output).ok_or_else(|| ToolError::ToolFailure {
            command: "zpool status".to_string(),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn driver_with(zpool: &str) -> ZfsDriver {
        ZfsDriver::new(ToolConfig {
            use_sudo: false,
            timeout: Duration::from_secs(10),
            zpool: zpool.to_string(),
            zfs: "/nonexistent/zfs".to_string(),
        })
    }

    #[tokio::test]
    async fn test_create_pool_without_disks_never_spawns() {
        // The zpool binary does not exist, so reaching it would be a Spawn error
        let driver = driver_with("/nonexistent/zpool");
        let result = driver.create_pool("p1", None, &[]).await;
        assert!(matches!(result, Err(ToolError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_get_pool_name_without_pool_line_fails() {
        // `echo status` prints "status", which has no pool line
        let driver = driver_with("echo");
        assert!(matches!(
            driver.get_pool_name().await,
            Err(ToolError::ToolFailure { .. })
        ));
    }
}

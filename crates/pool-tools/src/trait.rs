//! Pool manager trait for mocking

use crate::error::ToolError;

/// Node-local pool and volume operations
#[async_trait::async_trait]
pub trait PoolManager: Send + Sync {
    /// Import an existing pool, optionally from a cache file
    async fn import_pool(&self, pool_name: &str, cache_file: Option<&str>) -> Result<(), ToolError>;

    /// Create a pool over `disks`; fails with `Invalid` when `disks` is empty
    async fn create_pool(&self, pool_name: &str, cache_file: Option<&str>, disks: &[String]) -> Result<(), ToolError>;

    /// Create a thin-provisioned volume `pool/volume` of `capacity`
    async fn create_volume(&self, full_name: &str, capacity: &str) -> Result<(), ToolError>;

    /// Name of the pool present on this node
    async fn get_pool_name(&self) -> Result<String, ToolError>;
}

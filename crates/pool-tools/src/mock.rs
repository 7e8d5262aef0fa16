//! Mock PoolManager for unit testing
//!
//! Records every invocation that would have reached a tool and returns
//! configurable results. Argument validation is shared with the real
//! driver, so rejected calls are not recorded.

use crate::command;
use crate::error::ToolError;
use crate::pool_trait::PoolManager;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A tool invocation seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    ImportPool { pool_name: String, cache_file: Option<String> },
    CreatePool { pool_name: String, cache_file: Option<String>, disks: Vec<String> },
    CreateVolume { full_name: String, capacity: String },
    GetPoolName,
}

#[derive(Debug, Default)]
struct MockTools {
    calls: Vec<ToolCall>,
    import_fails: bool,
    create_pool_fails: bool,
    create_volume_fails: bool,
    pool_name: Option<String>,
}

/// Mock pool manager
#[derive(Debug, Clone, Default)]
pub struct MockPoolManager {
    state: Arc<Mutex<MockTools>>,
}

fn failure(command: &str) -> ToolError {
    ToolError::ToolFailure {
        command: command.to_string(),
        output: "cannot open: no such pool".to_string(),
    }
}

impl MockPoolManager {
    /// Mock whose node has `pool_name` and whose tools all succeed
    pub fn new(pool_name: impl Into<String>) -> Self {
        let mock = Self::default();
        mock.lock().pool_name = Some(pool_name.into());
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockTools> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `zpool import` exit nonzero
    pub fn fail_import(&self, fail: bool) {
        self.lock().import_fails = fail;
    }

    /// Make `zpool create` exit nonzero
    pub fn fail_create_pool(&self, fail: bool) {
        self.lock().create_pool_fails = fail;
    }

    /// Make `zfs create` exit nonzero
    pub fn fail_create_volume(&self, fail: bool) {
        self.lock().create_volume_fails = fail;
    }

    /// Recorded invocations, oldest first
    pub fn calls(&self) -> Vec<ToolCall> {
        self.lock().calls.clone()
    }
}

#[async_trait::async_trait]
impl PoolManager for MockPoolManager {
    async fn import_pool(&self, pool_name: &str, cache_file: Option<&str>) -> Result<(), ToolError> {
        command::import_args(pool_name, cache_file)?;
        let mut tools = self.lock();
        tools.calls.push(ToolCall::ImportPool {
            pool_name: pool_name.to_string(),
            cache_file: cache_file.map(str::to_string),
        });
        if tools.import_fails {
            return Err(failure("zpool import"));
        }
        Ok(())
    }

    async fn create_pool(&self, pool_name: &str, cache_file: Option<&str>, disks: &[String]) -> Result<(), ToolError> {
        command::create_pool_args(pool_name, cache_file, disks)?;
        let mut tools = self.lock();
        tools.calls.push(ToolCall::CreatePool {
            pool_name: pool_name.to_string(),
            cache_file: cache_file.map(str::to_string),
            disks: disks.to_vec(),
        });
        if tools.create_pool_fails {
            return Err(failure("zpool create"));
        }
        Ok(())
    }

    async fn create_volume(&self, full_name: &str, capacity: &str) -> Result<(), ToolError> {
        command::create_volume_args(full_name, capacity)?;
        let mut tools = self.lock();
        tools.calls.push(ToolCall::CreateVolume {
            full_name: full_name.to_string(),
            capacity: capacity.to_string(),
        });
        if tools.create_volume_fails {
            return Err(failure("zfs create"));
        }
        Ok(())
    }

    async fn get_pool_name(&self) -> Result<String, ToolError> {
        let mut tools = self.lock();
        tools.calls.push(ToolCall::GetPoolName);
        tools.pool_name.clone().ok_or_else(|| failure("zpool status"))
    }
}

//! Pool Tools
//!
//! Runs the node-local block pool manager (`zpool`) and volume manager
//! (`zfs`) as child processes. Combined stdout/stderr is captured and exit
//! status is mapped to [`ToolError`].

pub mod command;
pub mod driver;
pub mod error;
#[path = "trait.rs"]
pub mod pool_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use command::{Invocation, ToolConfig};
pub use driver::ZfsDriver;
pub use error::ToolError;
pub use pool_trait::PoolManager;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockPoolManager, ToolCall};

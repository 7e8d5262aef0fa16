//! Storage Control Plane CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the replica controller
//! and the upgrade engine.

pub mod labels;
pub mod pool;
pub mod replica;
pub mod storage_pool_claim;
pub mod upgrade_task;
pub mod version_details;
pub mod volume;
pub mod volume_replica;

pub use pool::*;
pub use replica::*;
pub use storage_pool_claim::*;
pub use upgrade_task::*;
pub use version_details::*;
pub use volume::*;
pub use volume_replica::*;

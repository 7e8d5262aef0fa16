//! Test utilities for unit testing sync handlers
//!
//! Fixture builders plus a harness wiring the handlers to in-memory mocks.

#[cfg(test)]
use crate::sync::{PoolSync, ReplicaSync};
#[cfg(test)]
use cluster_gateway::MockCluster;
#[cfg(test)]
use crds::{Pool, PoolSpec, Replica, ReplicaSpec};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use pool_tools::MockPoolManager;
#[cfg(test)]
use std::sync::Arc;

/// Helper to create a test Pool
#[cfg(test)]
pub fn test_pool(name: &str, pool_name: &str, disks: &[&str]) -> Pool {
    Pool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: PoolSpec {
            pool_name: pool_name.to_string(),
            cache_file: Some(format!("/tmp/{pool_name}.cache")),
            disks: disks.iter().map(|d| (*d).to_string()).collect(),
            ..Default::default()
        },
        status: None,
    }
}

/// Helper to create a test Replica
#[cfg(test)]
pub fn test_replica(name: &str, volume_name: &str, capacity: &str) -> Replica {
    Replica {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: ReplicaSpec {
            volume_name: volume_name.to_string(),
            capacity: capacity.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Handlers backed by a mock cluster and mock tools
#[cfg(test)]
pub struct Harness {
    pub cluster: MockCluster,
    pub tools: MockPoolManager,
    pub pools: PoolSync,
    pub replicas: ReplicaSync,
}

#[cfg(test)]
impl Harness {
    /// Harness whose node reports pool `node_pool`
    pub fn new(node_pool: &str) -> Self {
        let cluster = MockCluster::new();
        let tools = MockPoolManager::new(node_pool);
        Self {
            pools: PoolSync::new(Arc::new(cluster.clone()), Arc::new(tools.clone())),
            replicas: ReplicaSync::new(Arc::new(cluster.clone()), Arc::new(tools.clone())),
            cluster,
            tools,
        }
    }
}

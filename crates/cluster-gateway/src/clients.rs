//! Per-kind gateway handles
//!
//! Components take a `ClusterClients` instead of a generic gateway so each
//! call site names the kind it touches (`clients.pools.get(..)`).

use crate::gateway_trait::{PodExec, ResourceGateway};
use crds::{Pool, Replica, StoragePoolClaim, UpgradeTask, Volume, VolumeReplica};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, Pod, Service};
use std::sync::Arc;

/// A gateway that serves every kind the control plane touches
pub trait ClusterGateway:
    ResourceGateway<Pool>
    + ResourceGateway<Replica>
    + ResourceGateway<Volume>
    + ResourceGateway<VolumeReplica>
    + ResourceGateway<StoragePoolClaim>
    + ResourceGateway<UpgradeTask>
    + ResourceGateway<Deployment>
    + ResourceGateway<Service>
    + ResourceGateway<PersistentVolume>
    + ResourceGateway<Pod>
    + ResourceGateway<Job>
    + PodExec
{
}

impl<G> ClusterGateway for G where
    G: ResourceGateway<Pool>
        + ResourceGateway<Replica>
        + ResourceGateway<Volume>
        + ResourceGateway<VolumeReplica>
        + ResourceGateway<StoragePoolClaim>
        + ResourceGateway<UpgradeTask>
        + ResourceGateway<Deployment>
        + ResourceGateway<Service>
        + ResourceGateway<PersistentVolume>
        + ResourceGateway<Pod>
        + ResourceGateway<Job>
        + PodExec
{
}

/// Typed handles onto one shared gateway
#[derive(Clone)]
pub struct ClusterClients {
    pub pools: Arc<dyn ResourceGateway<Pool>>,
    pub replicas: Arc<dyn ResourceGateway<Replica>>,
    pub volumes: Arc<dyn ResourceGateway<Volume>>,
    pub volume_replicas: Arc<dyn ResourceGateway<VolumeReplica>>,
    pub pool_claims: Arc<dyn ResourceGateway<StoragePoolClaim>>,
    pub upgrade_tasks: Arc<dyn ResourceGateway<UpgradeTask>>,
    pub deployments: Arc<dyn ResourceGateway<Deployment>>,
    pub services: Arc<dyn ResourceGateway<Service>>,
    pub persistent_volumes: Arc<dyn ResourceGateway<PersistentVolume>>,
    pub pods: Arc<dyn ResourceGateway<Pod>>,
    pub jobs: Arc<dyn ResourceGateway<Job>>,
    pub exec: Arc<dyn PodExec>,
}

impl ClusterClients {
    /// Split one gateway into per-kind handles
    pub fn from_gateway<G: ClusterGateway + 'static>(gateway: Arc<G>) -> Self {
        Self {
            pools: Arc::clone(&gateway) as Arc<dyn ResourceGateway<Pool>>,
            replicas: Arc::clone(&gateway) as Arc<dyn ResourceGateway<Replica>>,
            volumes: Arc::clone(&gateway) as Arc<dyn ResourceGateway<Volume>>,
            volume_replicas: Arc::clone(&gateway) as Arc<dyn ResourceGateway<VolumeReplica>>,
            pool_claims: Arc::clone(&gateway) as Arc<dyn ResourceGateway<StoragePoolClaim>>,
            upgrade_tasks: Arc::clone(&gateway) as Arc<dyn ResourceGateway<UpgradeTask>>,
            deployments: Arc::clone(&gateway) as Arc<dyn ResourceGateway<Deployment>>,
            services: Arc::clone(&gateway) as Arc<dyn ResourceGateway<Service>>,
            persistent_volumes: Arc::clone(&gateway) as Arc<dyn ResourceGateway<PersistentVolume>>,
            pods: Arc::clone(&gateway) as Arc<dyn ResourceGateway<Pod>>,
            jobs: Arc::clone(&gateway) as Arc<dyn ResourceGateway<Job>>,
            exec: gateway as Arc<dyn PodExec>,
        }
    }
}

impl std::fmt::Debug for ClusterClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClients").finish_non_exhaustive()
    }
}

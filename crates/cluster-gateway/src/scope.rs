//! Per-kind scope adapters
//!
//! Namespaced kinds address a single namespace when one is given and all
//! namespaces otherwise. Cluster-scoped kinds ignore the namespace.

use crds::{Pool, Replica, StoragePoolClaim, UpgradeTask, Volume, VolumeReplica};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, Pod, Service};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// Resource kinds the gateway can address
pub trait ApiScope:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Build the API handle for `namespace`
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_scope {
    ($($kind:ty),* $(,)?) => {
        $(
            impl ApiScope for $kind {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(namespace) => Api::namespaced(client, namespace),
                        None => Api::all(client),
                    }
                }
            }
        )*
    };
}

macro_rules! cluster_scope {
    ($($kind:ty),* $(,)?) => {
        $(
            impl ApiScope for $kind {
                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }
            }
        )*
    };
}

namespaced_scope!(Deployment, Service, Pod, Job, Volume, VolumeReplica, UpgradeTask);
cluster_scope!(PersistentVolume, Pool, Replica, StoragePoolClaim);

//! Sync handlers for Pool and Replica.
//!
//! Each handler fetches the object named by the queue key and, on add,
//! converges node-local state through the pool tools. Update and delete are
//! observed and logged only. After an add the outcome is written back to
//! the object's status with a transition timestamp.

use crate::error::ControllerError;
use crate::handler::{QueueLoad, QueueOperation, split_key};
use async_trait::async_trait;
use cluster_gateway::{PatchBody, ResourceGateway};
use crds::{Pool, PoolPhase, Replica, ReplicaPhase};
use pool_tools::PoolManager;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-kind reconcile logic driven by the workers
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Kind name used in logs
    fn kind(&self) -> &'static str;

    async fn sync(&self, load: &QueueLoad) -> Result<(), ControllerError>;
}

/// Fetch the object behind `key`; `None` when it no longer exists
async fn fetch<K: Send + Sync + 'static>(
    gateway: &dyn ResourceGateway<K>,
    kind: &str,
    key: &str,
) -> Result<Option<K>, ControllerError> {
    let (namespace, name) = split_key(key)?;
    match gateway.get(name, namespace).await {
        Ok(object) => Ok(Some(object)),
        Err(e) if e.is_not_found() => {
            info!("{} {} no longer exists, dropping", kind, key);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn status_patch(phase: impl serde::Serialize, message: Option<&str>, pool_name: Option<&str>) -> PatchBody {
    let mut status = json!({
        "phase": phase,
        "message": message,
        "lastTransitionTime": chrono::Utc::now(),
    });
    if let Some(pool_name) = pool_name {
        status["poolName"] = json!(pool_name);
    }
    PatchBody::merge(json!({ "status": status }))
}

/// Status write failures do not fail the sync; the tool side effect already happened
async fn write_status<K: Send + Sync + 'static>(
    gateway: &dyn ResourceGateway<K>,
    kind: &str,
    name: &str,
    patch: PatchBody,
) {
    if let Err(e) = gateway.patch_status(name, None, &patch).await {
        warn!("Failed to update status of {} {}: {}", kind, name, e);
    }
}

/// Reconciles Pool resources
pub struct PoolSync {
    pools: Arc<dyn ResourceGateway<Pool>>,
    tools: Arc<dyn PoolManager>,
}

impl std::fmt::Debug for PoolSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSync").finish_non_exhaustive()
    }
}

impl PoolSync {
    pub fn new(pools: Arc<dyn ResourceGateway<Pool>>, tools: Arc<dyn PoolManager>) -> Self {
        Self { pools, tools }
    }

    async fn add(&self, name: &str, pool: &Pool) -> Result<(), ControllerError> {
        if let Err(e) = check_valid_pool(pool) {
            write_status(
                self.pools.as_ref(),
                "Pool",
                name,
                status_patch(PoolPhase::Invalid, Some(&e.to_string()), None),
            )
            .await;
            return Err(e);
        }

        let spec = &pool.spec;
        let cache_file = spec.cache_file.as_deref();
        match self.tools.import_pool(&spec.pool_name, cache_file).await {
            Ok(()) => info!("Imported pool {} for Pool {}", spec.pool_name, name),
            Err(import_err) => {
                debug!("Import of pool {} failed, creating it: {}", spec.pool_name, import_err);
                if let Err(e) = self.tools.create_pool(&spec.pool_name, cache_file, &spec.disks).await {
                    error!("Failed to create pool {}: {}", spec.pool_name, e);
                    write_status(
                        self.pools.as_ref(),
                        "Pool",
                        name,
                        status_patch(PoolPhase::Error, Some(&e.to_string()), None),
                    )
                    .await;
                    return Err(e.into());
                }
                info!("Created pool {} for Pool {}", spec.pool_name, name);
            }
        }

        write_status(
            self.pools.as_ref(),
            "Pool",
            name,
            status_patch(PoolPhase::Healthy, None, None),
        )
        .await;
        Ok(())
    }
}

/// Pool name and disks must be set before any tool runs
pub fn check_valid_pool(pool: &Pool) -> Result<(), ControllerError> {
    let name = pool.metadata.name.as_deref().unwrap_or_default();
    if pool.spec.pool_name.is_empty() {
        return Err(ControllerError::InvalidResource(format!("Pool {name} has no poolName")));
    }
    if pool.spec.disks.is_empty() {
        return Err(ControllerError::InvalidResource(format!("Pool {name} has no disks")));
    }
    Ok(())
}

#[async_trait]
impl SyncHandler for PoolSync {
    fn kind(&self) -> &'static str {
        "Pool"
    }

    async fn sync(&self, load: &QueueLoad) -> Result<(), ControllerError> {
        let Some(pool) = fetch(self.pools.as_ref(), "Pool", &load.key).await? else {
            return Ok(());
        };
        match load.operation {
            QueueOperation::Add => self.add(&load.key, &pool).await,
            QueueOperation::Update | QueueOperation::Delete => {
                info!("Pool {} {} observed (phase {:?})", load.key, load.operation, pool.phase());
                Ok(())
            }
        }
    }
}

/// Reconciles Replica resources
pub struct ReplicaSync {
    replicas: Arc<dyn ResourceGateway<Replica>>,
    tools: Arc<dyn PoolManager>,
}

impl std::fmt::Debug for ReplicaSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaSync").finish_non_exhaustive()
    }
}

impl ReplicaSync {
    pub fn new(replicas: Arc<dyn ResourceGateway<Replica>>, tools: Arc<dyn PoolManager>) -> Self {
        Self { replicas, tools }
    }

    async fn add(&self, name: &str, replica: &Replica) -> Result<(), ControllerError> {
        if let Err(e) = check_valid_replica(replica) {
            write_status(
                self.replicas.as_ref(),
                "Replica",
                name,
                status_patch(ReplicaPhase::Invalid, Some(&e.to_string()), None),
            )
            .await;
            return Err(e);
        }

        let pool_name = self.tools.get_pool_name().await?;
        info!("Replica {} belongs to pool {}", name, pool_name);

        let full_name = format!("{}/{}", pool_name, replica.spec.volume_name);
        if let Err(e) = self.tools.create_volume(&full_name, &replica.spec.capacity).await {
            error!("Failed to create volume {}: {}", full_name, e);
            write_status(
                self.replicas.as_ref(),
                "Replica",
                name,
                status_patch(ReplicaPhase::Error, Some(&e.to_string()), Some(&pool_name)),
            )
            .await;
            return Err(e.into());
        }
        info!("Created volume {} ({})", full_name, replica.spec.capacity);

        write_status(
            self.replicas.as_ref(),
            "Replica",
            name,
            status_patch(ReplicaPhase::Healthy, None, Some(&pool_name)),
        )
        .await;
        Ok(())
    }
}

/// Volume name and capacity must be set before any tool runs
pub fn check_valid_replica(replica: &Replica) -> Result<(), ControllerError> {
    let name = replica.metadata.name.as_deref().unwrap_or_default();
    if replica.spec.volume_name.is_empty() {
        return Err(ControllerError::InvalidResource(format!("Replica {name} has no volumeName")));
    }
    if replica.spec.capacity.is_empty() {
        return Err(ControllerError::InvalidResource(format!("Replica {name} has no capacity")));
    }
    Ok(())
}

#[async_trait]
impl SyncHandler for ReplicaSync {
    fn kind(&self) -> &'static str {
        "Replica"
    }

    async fn sync(&self, load: &QueueLoad) -> Result<(), ControllerError> {
        let Some(replica) = fetch(self.replicas.as_ref(), "Replica", &load.key).await? else {
            return Ok(());
        };
        match load.operation {
            QueueOperation::Add => self.add(&load.key, &replica).await,
            QueueOperation::Update | QueueOperation::Delete => {
                let pool = replica.status.as_ref().and_then(|s| s.pool_name.as_deref());
                info!(
                    "Replica {} {} observed (pool {})",
                    load.key,
                    load.operation,
                    pool.unwrap_or("unknown")
                );
                Ok(())
            }
        }
    }
}


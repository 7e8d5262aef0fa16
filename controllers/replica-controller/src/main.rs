//! Replica Controller
//!
//! Node-local controller for the storage pool layer:
//! - Pool: imports the node's pool, creating it over the listed disks when
//!   no pool can be imported
//! - Replica: creates a thin-provisioned volume on the node's pool
//!
//! Each kind has its own work queue, watch bridge and worker set.

mod backoff;
mod controller;
mod error;
mod handler;
mod queue;
mod sync;
mod test_utils;
mod watcher;

use crate::controller::{Controller, ControllerConfig};
use crate::error::ControllerError;
use crate::handler::{QueueLoad, ResourceEventHandler};
use crate::queue::WorkQueue;
use crate::sync::{PoolSync, ReplicaSync, SyncHandler};
use clap::Parser;
use cluster_gateway::{ApiScope, ClusterClients, KubeGateway};
use crds::{Pool, Replica};
use pool_tools::{PoolManager, ToolConfig, ZfsDriver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "replica-controller", about = "Converges Pool and Replica resources on this node")]
struct Args {
    /// Worker count per controller
    #[arg(long, env = "THREADS", default_value_t = 2)]
    threads: usize,

    /// Path to a kubeconfig; in-cluster or local config is inferred when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Seconds to wait for the first complete list
    #[arg(long, env = "CACHE_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    cache_sync_timeout_secs: u64,

    /// Accepted for compatibility with existing manifests
    #[arg(long, env = "CHANGE_MINIKUBE_NONE_USER")]
    change_minikube_none_user: Option<String>,
}

/// Watch bridge plus controller for one kind
fn spawn_kind<K>(
    client: kube::Client,
    handler: Arc<dyn SyncHandler>,
    config: &ControllerConfig,
) -> (Controller, tokio::task::JoinHandle<Result<(), ControllerError>>)
where
    K: ApiScope + std::fmt::Debug,
{
    let kind = handler.kind();
    let queue: WorkQueue<QueueLoad> = WorkQueue::new(config.min_backoff, config.max_backoff);
    let (synced_tx, synced_rx) = watch::channel(false);
    let events = ResourceEventHandler::new(kind, queue.clone());
    let api = K::api(client, None);
    let bridge = tokio::spawn(async move { watcher::run_watch_bridge(api, events, synced_tx, kind).await });
    (Controller::new(queue, handler, synced_rx, config.clone()), bridge)
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Replica Controller");

    let args = Args::parse();
    if args.threads == 0 {
        return Err(ControllerError::InvalidConfig("--threads must be at least 1".to_string()));
    }
    let tool_config = ToolConfig::from_env();
    let config = ControllerConfig {
        threads: args.threads,
        cache_sync_timeout: Duration::from_secs(args.cache_sync_timeout_secs),
        ..ControllerConfig::default()
    };

    info!("Configuration:");
    info!("  Threads: {}", config.threads);
    info!(
        "  Kubeconfig: {}",
        args.kubeconfig
            .as_deref()
            .map_or_else(|| "inferred".to_string(), |p| p.display().to_string())
    );
    info!("  Cache sync timeout: {:?}", config.cache_sync_timeout);
    info!("  Use sudo: {}", tool_config.use_sudo);
    if let Some(value) = args.change_minikube_none_user.as_deref() {
        info!("  CHANGE_MINIKUBE_NONE_USER: {}", value);
    }

    let gateway = Arc::new(KubeGateway::new(args.kubeconfig));
    let client = gateway.client().await?;
    let clients = ClusterClients::from_gateway(gateway);
    let tools: Arc<dyn PoolManager> = Arc::new(ZfsDriver::new(tool_config));

    let pool_handler: Arc<dyn SyncHandler> = Arc::new(PoolSync::new(Arc::clone(&clients.pools), Arc::clone(&tools)));
    let replica_handler: Arc<dyn SyncHandler> = Arc::new(ReplicaSync::new(Arc::clone(&clients.replicas), tools));
    let (pool_controller, pool_bridge) = spawn_kind::<Pool>(client.clone(), pool_handler, &config);
    let (replica_controller, replica_bridge) = spawn_kind::<Replica>(client, replica_handler, &config);

    let (stop_tx, stop_rx) = watch::channel(false);
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        stop_tx.send_replace(true);
    });

    let result = tokio::try_join!(
        pool_controller.run(stopped(stop_rx.clone())),
        replica_controller.run(stopped(stop_rx)),
    );

    pool_bridge.abort();
    replica_bridge.abort();
    result.map(|_| ())?;

    info!("Replica Controller stopped");
    Ok(())
}

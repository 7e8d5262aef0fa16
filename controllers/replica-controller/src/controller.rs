//! Main controller implementation.
//!
//! A `Controller` owns one work queue and one sync handler. `run` waits for
//! the informer cache, starts the workers and keeps them alive until the
//! stop future completes.

use crate::error::ControllerError;
use crate::handler::QueueLoad;
use crate::queue::WorkQueue;
use crate::sync::SyncHandler;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Tunables for a controller instance
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of parallel workers
    pub threads: usize,
    /// How long to wait for the first complete list
    pub cache_sync_timeout: Duration,
    /// Requeue delay after the first failure
    pub min_backoff: Duration,
    /// Requeue delay cap
    pub max_backoff: Duration,
    /// Delay before a stopped worker is started again
    pub worker_restart: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threads: 2,
            cache_sync_timeout: Duration::from_secs(60),
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            worker_restart: Duration::from_secs(1),
        }
    }
}

/// Shuts the queue down when `run` returns by any path
struct ShutdownGuard(WorkQueue<QueueLoad>);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.shut_down();
    }
}

/// Work-queue driven reconciler for one resource kind
pub struct Controller {
    queue: WorkQueue<QueueLoad>,
    handler: Arc<dyn SyncHandler>,
    synced: watch::Receiver<bool>,
    config: ControllerConfig,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("kind", &self.handler.kind())
            .field("queued", &self.queue.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Controller {
    pub fn new(
        queue: WorkQueue<QueueLoad>,
        handler: Arc<dyn SyncHandler>,
        synced: watch::Receiver<bool>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            synced,
            config,
        }
    }

    /// Runs workers until `stop` completes
    pub async fn run(self, stop: impl Future<Output = ()>) -> Result<(), ControllerError> {
        let Self {
            queue,
            handler,
            mut synced,
            config,
        } = self;
        let _guard = ShutdownGuard(queue.clone());
        let kind = handler.kind();

        info!("Starting {} controller", kind);
        info!("Waiting for {} informer caches to sync", kind);
        let sync_result = tokio::time::timeout(config.cache_sync_timeout, synced.wait_for(|synced| *synced))
            .await
            .map(|waited| waited.map(|_| ()));
        match sync_result {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(ControllerError::Watch(format!("{kind} watch stopped before caches synced")));
            }
            Err(_) => return Err(ControllerError::CacheSyncTimeout(config.cache_sync_timeout)),
        }

        info!("Starting {} {} workers", config.threads, kind);
        let workers: Vec<_> = (0..config.threads)
            .map(|_| {
                let (queue, handler) = (queue.clone(), Arc::clone(&handler));
                let restart = config.worker_restart;
                tokio::spawn(async move {
                    while !queue.is_shutting_down() {
                        run_worker(&queue, handler.as_ref()).await;
                        if !queue.is_shutting_down() {
                            tokio::time::sleep(restart).await;
                        }
                    }
                })
            })
            .collect();
        info!("Started {} workers", kind);

        stop.await;
        info!("Shutting down {} workers", kind);
        queue.shut_down();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("{} worker exited abnormally: {}", kind, e);
            }
        }
        Ok(())
    }
}

/// Process items until the queue shuts down
pub async fn run_worker(queue: &WorkQueue<QueueLoad>, handler: &dyn SyncHandler) {
    while process_next_item(queue, handler).await {}
}

/// Take one item and sync it; false once the queue has shut down
pub async fn process_next_item(queue: &WorkQueue<QueueLoad>, handler: &dyn SyncHandler) -> bool {
    let Some(item) = queue.get().await else {
        return false;
    };
    let kind = handler.kind();

    match AssertUnwindSafe(handler.sync(&item)).catch_unwind().await {
        Ok(Ok(())) => {
            queue.forget(&item);
            info!("Successfully synced {} '{}' for {} event", kind, item.key, item.operation);
        }
        Ok(Err(e)) if !e.is_retryable() => {
            queue.forget(&item);
            error!("Dropping {} '{}': {}", kind, item.key, e);
        }
        Ok(Err(e)) => {
            error!("Error syncing {} '{}' for {} event: {}", kind, item.key, item.operation, e);
            queue.add_rate_limited(item.clone());
            debug!("{} '{}' requeued {} times", kind, item.key, queue.num_requeues(&item));
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Panic while syncing {} '{}': {}", kind, item.key, message);
            queue.add_rate_limited(item.clone());
        }
    }

    queue.done(&item);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::QueueOperation;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SyncHandler for ScriptedHandler {
        fn kind(&self) -> &'static str {
            "Test"
        }

        async fn sync(&self, load: &QueueLoad) -> Result<(), ControllerError> {
            self.seen.lock().unwrap().push(load.key.clone());
            match load.key.as_str() {
                "panics" => panic!("handler bug"),
                "fails" => Err(ControllerError::InvalidResource("bad".to_string())),
                "malformed/key/x" => Err(ControllerError::Structural("bad key".to_string())),
                _ => Ok(()),
            }
        }
    }

    fn queue() -> WorkQueue<QueueLoad> {
        WorkQueue::new(Duration::from_secs(10), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_success_forgets_item() {
        let q = queue();
        let item = QueueLoad::new("ok", QueueOperation::Add);
        q.add_rate_limited(item.clone());
        q.add(item.clone());
        assert!(process_next_item(&q, &ScriptedHandler::default()).await);
        assert_eq!(q.num_requeues(&item), 0);
    }

    #[tokio::test]
    async fn test_failure_is_rate_limited() {
        let q = queue();
        let item = QueueLoad::new("fails", QueueOperation::Add);
        q.add(item.clone());
        assert!(process_next_item(&q, &ScriptedHandler::default()).await);
        assert_eq!(q.num_requeues(&item), 1);
    }

    #[tokio::test]
    async fn test_structural_error_is_dropped() {
        let q = queue();
        let item = QueueLoad::new("malformed/key/x", QueueOperation::Add);
        q.add(item.clone());
        assert!(process_next_item(&q, &ScriptedHandler::default()).await);
        assert_eq!(q.num_requeues(&item), 0);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_caught_and_requeued() {
        let q = queue();
        let handler = ScriptedHandler::default();
        let item = QueueLoad::new("panics", QueueOperation::Add);
        q.add(item.clone());
        q.add(QueueLoad::new("ok", QueueOperation::Add));

        assert!(process_next_item(&q, &handler).await);
        assert_eq!(q.num_requeues(&item), 1);
        // The worker keeps going
        assert!(process_next_item(&q, &handler).await);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["panics".to_string(), "ok".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_sync_timeout() {
        let (_synced, synced_rx) = watch::channel(false);
        let config = ControllerConfig {
            cache_sync_timeout: Duration::from_millis(20),
            ..ControllerConfig::default()
        };
        let controller = Controller::new(queue(), Arc::new(ScriptedHandler::default()), synced_rx, config);
        let result = controller.run(std::future::pending()).await;
        assert!(matches!(result, Err(ControllerError::CacheSyncTimeout(_))));
    }

    #[tokio::test]
    async fn test_run_processes_until_stopped() {
        let (_synced, synced_rx) = watch::channel(true);
        let q = queue();
        let handler = Arc::new(ScriptedHandler::default());
        let controller = Controller::new(
            q.clone(),
            Arc::clone(&handler) as Arc<dyn SyncHandler>,
            synced_rx,
            ControllerConfig::default(),
        );
        q.add(QueueLoad::new("a", QueueOperation::Add));
        q.add(QueueLoad::new("b", QueueOperation::Update));

        controller
            .run(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
        assert!(q.is_shutting_down());
    }
}

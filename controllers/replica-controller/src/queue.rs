//! Rate-limited work queue
//!
//! FIFO queue with the guarantees the sync workers rely on:
//! - an item already waiting in the queue is not added twice
//! - at most one item per key is being processed at any time; items for a
//!   busy key stay queued until `done` releases the key
//! - `get` waits until an item is available or the queue shuts down
//! - `add_rate_limited` re-adds an item after a per-item Fibonacci delay
//!   that grows with its failure count until `forget` resets it

use crate::backoff::FibonacciBackoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// Items carry the key that serializes their processing
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for String {
    fn key(&self) -> &str {
        self
    }
}

#[derive(Debug)]
struct QueueState<T> {
    queue: VecDeque<T>,
    queued: HashSet<T>,
    processing: HashSet<String>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

#[derive(Debug)]
struct QueueInner<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    min_backoff: Duration,
    max_backoff: Duration,
}

/// Cloneable handle to a shared work queue
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Keyed + Clone + Eq + Hash + Debug + Send + 'static,
{
    /// Queue whose retry delays run from `min_backoff` to `max_backoff`
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    queued: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                min_backoff,
                max_backoff,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `item` unless it is already waiting or the queue is shut down
    pub fn add(&self, item: T) {
        {
            let mut state = self.lock();
            if state.shutting_down {
                debug!("Queue shut down, dropping {:?}", item);
                return;
            }
            if !state.queued.insert(item.clone()) {
                debug!("Already queued: {:?}", item);
                return;
            }
            state.queue.push_back(item);
        }
        self.inner.notify.notify_one();
    }

    /// Re-add `item` after its backoff delay
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(item.clone()).or_insert(0);
            *failures += 1;
            FibonacciBackoff::for_failures(*failures, self.inner.min_backoff, self.inner.max_backoff)
        };
        debug!("Requeueing {:?} in {:?}", item, delay);
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Clear the failure count of `item`
    pub fn forget(&self, item: &T) {
        self.lock().failures.remove(item);
    }

    /// Number of times `item` has been requeued since it was last forgotten
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Next item whose key is idle; `None` once the queue shuts down
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                let ready = state
                    .queue
                    .iter()
                    .position(|item| !state.processing.contains(item.key()));
                if let Some(item) = ready.and_then(|index| state.queue.remove(index)) {
                    state.queued.remove(&item);
                    state.processing.insert(item.key().to_string());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Release the key of `item` after processing
    pub fn done(&self, item: &T) {
        let waiting = {
            let mut state = self.lock();
            state.processing.remove(item.key());
            state.queue.iter().any(|queued| queued.key() == item.key())
        };
        if waiting {
            self.inner.notify.notify_one();
        }
    }

    /// Items waiting to be processed
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out items and wake every waiter
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

//! Watch bridge.
//!
//! Turns the `kube_runtime` watcher stream into add/update/delete callbacks
//! on a [`ResourceEventHandler`]. A table of last-seen resourceVersions
//! makes an `Apply` for a known key an update whose old version is the
//! remembered one, so a re-list that re-delivers unchanged objects is a
//! resync and gets dropped by the handler. Keys that disappear across a
//! re-list are reported as deletes.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::handler::{ResourceEventHandler, object_key};
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Informer-level change derived from a watch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added { key: String },
    Updated { key: String, old_version: String, new_version: String },
    Deleted { key: String },
    Synced,
}

/// Last-seen resourceVersion per key
#[derive(Debug, Default)]
pub struct EventBridge {
    versions: HashMap<String, String>,
    relisted: Option<HashSet<String>>,
}

impl EventBridge {
    fn apply<K: Resource>(&mut self, object: &K) -> Option<Change> {
        let key = object_key(object)?;
        let new_version = object.meta().resource_version.clone().unwrap_or_default();
        if let Some(relisted) = self.relisted.as_mut() {
            relisted.insert(key.clone());
        }
        match self.versions.insert(key.clone(), new_version.clone()) {
            None => Some(Change::Added { key }),
            Some(old_version) => Some(Change::Updated {
                key,
                old_version,
                new_version,
            }),
        }
    }

    /// Changes implied by one watch event
    pub fn translate<K: Resource>(&mut self, event: watcher::Event<K>) -> Vec<Change> {
        match event {
            watcher::Event::Apply(object) | watcher::Event::InitApply(object) => {
                self.apply(&object).into_iter().collect()
            }
            watcher::Event::Delete(object) => object_key(&object)
                .map(|key| {
                    self.versions.remove(&key);
                    Change::Deleted { key }
                })
                .into_iter()
                .collect(),
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let mut gone: Vec<String> = self
                    .versions
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                gone.sort();
                let mut changes: Vec<Change> = gone
                    .into_iter()
                    .map(|key| {
                        self.versions.remove(&key);
                        Change::Deleted { key }
                    })
                    .collect();
                changes.push(Change::Synced);
                changes
            }
        }
    }
}

/// Feed watch events for `api` into `handler` until the stream ends
///
/// `synced` flips to true after the first complete list.
pub async fn run_watch_bridge<K>(
    api: Api<K>,
    handler: ResourceEventHandler,
    synced: watch::Sender<bool>,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Clone + Eq + std::hash::Hash,
{
    info!("Starting {} watcher", resource_name);
    let mut bridge = EventBridge::default();
    let mut backoff = FibonacciBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
    let mut stream = watcher(api, watcher::Config::default()).boxed();

    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                backoff.reset();
                for change in bridge.translate(event) {
                    dispatch(&handler, &synced, resource_name, change);
                }
            }
            Err(e) => {
                let delay = backoff.next_backoff();
                warn!("{} watch error, retrying in {:?}: {}", resource_name, delay, e);
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(ControllerError::Watch(format!("{resource_name} watch stream ended")))
}

fn dispatch(handler: &ResourceEventHandler, synced: &watch::Sender<bool>, resource_name: &str, change: Change) {
    match change {
        Change::Added { key } => handler.on_add(&key),
        Change::Updated {
            key,
            old_version,
            new_version,
        } => handler.on_update(&key, &old_version, &new_version),
        Change::Deleted { key } => handler.on_delete(&key),
        Change::Synced => {
            if !*synced.borrow() {
                info!("{} cache synced", resource_name);
            }
            debug!("{} list complete", resource_name);
            synced.send_replace(true);
        }
    }
}

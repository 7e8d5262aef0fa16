//! Queue items and informer event handlers

use crate::error::ControllerError;
use crate::queue::{Keyed, WorkQueue};
use kube::Resource;
use std::fmt;
use tracing::debug;

/// What happened to the object behind a queue key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    Add,
    Update,
    Delete,
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            QueueOperation::Add => "add",
            QueueOperation::Update => "update",
            QueueOperation::Delete => "delete",
        };
        f.write_str(op)
    }
}

/// Unit of work: an object key plus the operation observed on it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueLoad {
    pub key: String,
    pub operation: QueueOperation,
}

impl QueueLoad {
    pub fn new(key: impl Into<String>, operation: QueueOperation) -> Self {
        Self {
            key: key.into(),
            operation,
        }
    }
}

impl Keyed for QueueLoad {
    fn key(&self) -> &str {
        &self.key
    }
}

/// `namespace/name`, or `name` for cluster-scoped objects
pub fn object_key<K: Resource>(object: &K) -> Option<String> {
    let meta = object.meta();
    let name = meta.name.as_deref().filter(|name| !name.is_empty())?;
    match meta.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        Some(namespace) => Some(format!("{namespace}/{name}")),
        None => Some(name.to_string()),
    }
}

/// Split a queue key into namespace and name
pub fn split_key(key: &str) -> Result<(Option<&str>, &str), ControllerError> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((None, *name)),
        [namespace, name] if !name.is_empty() => Ok((Some(*namespace).filter(|ns| !ns.is_empty()), *name)),
        _ => Err(ControllerError::Structural(format!("unexpected key format: {key:?}"))),
    }
}

/// Translates informer callbacks into queue items
#[derive(Debug, Clone)]
pub struct ResourceEventHandler {
    kind: &'static str,
    queue: WorkQueue<QueueLoad>,
}

impl ResourceEventHandler {
    pub fn new(kind: &'static str, queue: WorkQueue<QueueLoad>) -> Self {
        Self { kind, queue }
    }

    pub fn on_add(&self, key: &str) {
        debug!("{} {} added", self.kind, key);
        self.queue.add(QueueLoad::new(key, QueueOperation::Add));
    }

    /// Periodic resyncs re-deliver unchanged objects; those are dropped
    pub fn on_update(&self, key: &str, old_version: &str, new_version: &str) {
        if old_version == new_version {
            debug!("{} {} unchanged at resourceVersion {}", self.kind, key, new_version);
            return;
        }
        debug!("{} {} updated", self.kind, key);
        self.queue.add(QueueLoad::new(key, QueueOperation::Update));
    }

    pub fn on_delete(&self, key: &str) {
        debug!("{} {} deleted", self.kind, key);
        self.queue.add(QueueLoad::new(key, QueueOperation::Delete));
    }
}

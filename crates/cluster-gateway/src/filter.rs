//! List filtering predicates

use crds::{Pool, PoolPhase};
use kube::Resource;
use std::collections::HashSet;

/// Predicate over a listed object
pub type Predicate<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;

/// Keep the items that pass every predicate, preserving order
pub fn filter<K>(items: Vec<K>, predicates: &[Predicate<K>]) -> Vec<K> {
    items
        .into_iter()
        .filter(|item| predicates.iter().all(|predicate| predicate(item)))
        .collect()
}

/// Objects whose UID is not in `uids`
pub fn not_in_uids<K: Resource + 'static>(uids: HashSet<String>) -> Predicate<K> {
    Box::new(move |object: &K| {
        object
            .meta()
            .uid
            .as_ref()
            .is_none_or(|uid| !uids.contains(uid))
    })
}

/// Pools whose phase is healthy
pub fn is_healthy() -> Predicate<Pool> {
    Box::new(|pool: &Pool| pool.phase() == PoolPhase::Healthy)
}

/// Objects carrying `key=value`
pub fn has_label<K: Resource + 'static>(key: impl Into<String>, value: impl Into<String>) -> Predicate<K> {
    let key = key.into();
    let value = value.into();
    Box::new(move |object: &K| {
        object
            .meta()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&key))
            .is_some_and(|found| *found == value)
    })
}

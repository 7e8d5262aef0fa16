//! Mock cluster store for unit testing
//!
//! `MockCluster` implements [`ResourceGateway`] for every kind and
//! [`PodExec`], so it can stand behind [`crate::ClusterClients`] in tests
//! without a running API server.
//!
//! Objects are kept as JSON keyed by kind, namespace and name. The mock
//! assigns UIDs and resource versions, bumps `metadata.generation` on
//! spec writes, records every call and supports:
//! - programmable failures per verb and kind (one-shot or sticky)
//! - reactors that stand in for cluster controllers reacting to writes
//! - scripted exec responses

mod merge;
mod selector;

use crate::error::GatewayError;
use crate::gateway_trait::{ListOptions, PatchBody, PodExec, ResourceGateway, require_name};
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use merge::strategic_merge;

/// Gateway operation, used for call accounting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Patch,
    PatchStatus,
    Delete,
    Exec,
}

/// Failure returned by a programmed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    Conflict,
    Forbidden,
    Invalid,
    Transport(String),
}

impl MockFailure {
    fn into_error(self, kind: &str, name: &str) -> GatewayError {
        match self {
            MockFailure::NotFound => GatewayError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            MockFailure::Conflict => GatewayError::Conflict(format!("{kind} {name} was modified")),
            MockFailure::Forbidden => GatewayError::Forbidden(format!("{kind} {name} is forbidden")),
            MockFailure::Invalid => GatewayError::Invalid(format!("{kind} {name} is invalid")),
            MockFailure::Transport(message) => GatewayError::Transport(message),
        }
    }
}

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    /// Patch body, written object or exec command
    pub body: Option<Value>,
}

/// Callback run on a stored object after each write of its kind
pub type Reactor = Arc<dyn Fn(Verb, &mut Value) + Send + Sync>;

type ObjectKey = (String, String, String);

#[derive(Default)]
struct MockState {
    objects: BTreeMap<ObjectKey, Value>,
    calls: Vec<MockCall>,
    next_failures: HashMap<(Verb, String), VecDeque<MockFailure>>,
    sticky_failures: HashMap<(Verb, String), MockFailure>,
    reactors: HashMap<String, Reactor>,
    exec_responses: VecDeque<Result<String, MockFailure>>,
    default_exec: Option<Result<String, MockFailure>>,
    next_uid: u64,
    resource_version: u64,
}

impl MockState {
    fn take_failure(&mut self, verb: Verb, kind: &str) -> Option<MockFailure> {
        let key = (verb, kind.to_string());
        if let Some(failure) = self.next_failures.get_mut(&key).and_then(VecDeque::pop_front) {
            return Some(failure);
        }
        self.sticky_failures.get(&key).cloned()
    }

    fn record(&mut self, verb: Verb, kind: &str, namespace: Option<&str>, name: &str, body: Option<Value>) {
        self.calls.push(MockCall {
            verb,
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            body,
        });
    }

    fn stamp_new(&mut self, object: &mut Value) {
        self.next_uid += 1;
        self.resource_version += 1;
        let metadata = &mut object["metadata"];
        if metadata.get("uid").and_then(Value::as_str).is_none() {
            metadata["uid"] = json!(format!("uid-{}", self.next_uid));
        }
        metadata["resourceVersion"] = json!(self.resource_version.to_string());
        if metadata.get("generation").and_then(Value::as_i64).is_none() {
            metadata["generation"] = json!(1);
        }
    }

    fn stamp_write(&mut self, object: &mut Value, spec_changed: bool) {
        self.resource_version += 1;
        let metadata = &mut object["metadata"];
        metadata["resourceVersion"] = json!(self.resource_version.to_string());
        if spec_changed {
            let generation = metadata.get("generation").and_then(Value::as_i64).unwrap_or(0);
            metadata["generation"] = json!(generation + 1);
        }
    }

    fn react(&self, kind: &str, verb: Verb, object: &mut Value) {
        if let Some(reactor) = self.reactors.get(kind) {
            reactor(verb, object);
        }
    }
}

/// In-memory cluster store
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

impl std::fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCluster").finish_non_exhaustive()
    }
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}

fn key(kind: &str, namespace: Option<&str>, name: &str) -> ObjectKey {
    (kind.to_string(), namespace.unwrap_or_default().to_string(), name.to_string())
}

fn object_namespace(object: &Value) -> Option<String> {
    object["metadata"]["namespace"].as_str().map(str::to_string)
}

impl MockCluster {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object without recording a call
    pub fn insert<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let Ok(mut value) = serde_json::to_value(object) else {
            return;
        };
        let kind = kind_of::<K>();
        let name = object.meta().name.clone().unwrap_or_default();
        let namespace = object.meta().namespace.clone();
        let mut state = self.lock();
        state.stamp_new(&mut value);
        state.objects.insert(key(&kind, namespace.as_deref(), &name), value);
    }

    /// Current stored copy of an object
    pub fn object<K>(&self, name: &str, namespace: Option<&str>) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let state = self.lock();
        state
            .objects
            .get(&key(&kind_of::<K>(), namespace, name))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Every recorded call, oldest first
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Recorded calls for one kind
    pub fn calls_for(&self, kind: &str) -> Vec<MockCall> {
        self.lock().calls.iter().filter(|call| call.kind == kind).cloned().collect()
    }

    /// Number of recorded calls with `verb` on `kind`
    pub fn count(&self, verb: Verb, kind: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.verb == verb && call.kind == kind)
            .count()
    }

    /// Fail the next `verb` call on kind `K` with `failure`
    pub fn fail_next<K: Resource<DynamicType = ()>>(&self, verb: Verb, failure: MockFailure) {
        self.lock()
            .next_failures
            .entry((verb, kind_of::<K>()))
            .or_default()
            .push_back(failure);
    }

    /// Fail every `verb` call on kind `K` until cleared
    pub fn fail_always<K: Resource<DynamicType = ()>>(&self, verb: Verb, failure: MockFailure) {
        self.lock().sticky_failures.insert((verb, kind_of::<K>()), failure);
    }

    /// Drop all programmed failures
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.next_failures.clear();
        state.sticky_failures.clear();
    }

    /// Run `reactor` on every stored object of kind `K` after a write
    pub fn on_write<K: Resource<DynamicType = ()>>(&self, reactor: impl Fn(Verb, &mut Value) + Send + Sync + 'static) {
        self.lock().reactors.insert(kind_of::<K>(), Arc::new(reactor));
    }

    /// Queue the result of the next exec call
    pub fn script_exec(&self, response: Result<String, MockFailure>) {
        self.lock().exec_responses.push_back(response);
    }

    /// Result of exec calls once the scripted queue is drained
    pub fn default_exec(&self, response: Result<String, MockFailure>) {
        self.lock().default_exec = Some(response);
    }

    fn write<K>(
        &self,
        verb: Verb,
        name: &str,
        namespace: Option<&str>,
        body: Option<Value>,
        mutate: impl FnOnce(&mut Value) -> Result<bool, GatewayError>,
    ) -> Result<K, GatewayError>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let kind = kind_of::<K>();
        let mut state = self.lock();
        state.record(verb, &kind, namespace, name, body);
        if let Some(failure) = state.take_failure(verb, &kind) {
            return Err(failure.into_error(&kind, name));
        }
        let object_key = key(&kind, namespace, name);
        let Some(mut object) = state.objects.get(&object_key).cloned() else {
            return Err(GatewayError::NotFound {
                kind,
                name: name.to_string(),
            });
        };
        let spec_changed = mutate(&mut object)?;
        state.stamp_write(&mut object, spec_changed);
        state.react(&kind, verb, &mut object);
        state.objects.insert(object_key, object.clone());
        Ok(serde_json::from_value(object)?)
    }
}

#[async_trait::async_trait]
impl<K> ResourceGateway<K> for MockCluster
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<K, GatewayError> {
        let kind = kind_of::<K>();
        let name = require_name(Some(name), &kind)?;
        let mut state = self.lock();
        state.record(Verb::Get, &kind, namespace, name, None);
        if let Some(failure) = state.take_failure(Verb::Get, &kind) {
            return Err(failure.into_error(&kind, name));
        }
        match state.objects.get(&key(&kind, namespace, name)) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Err(GatewayError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }

    async fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<Vec<K>, GatewayError> {
        let kind = kind_of::<K>();
        let mut state = self.lock();
        let selector = options.label_selector.clone().map(Value::String);
        state.record(Verb::List, &kind, namespace, "", selector);
        if let Some(failure) = state.take_failure(Verb::List, &kind) {
            return Err(failure.into_error(&kind, ""));
        }
        state
            .objects
            .iter()
            .filter(|((object_kind, object_namespace, _), _)| {
                *object_kind == kind && namespace.is_none_or(|ns| ns == object_namespace.as_str())
            })
            .map(|(_, value)| value)
            .filter(|value| {
                options
                    .label_selector
                    .as_deref()
                    .is_none_or(|labels| selector::matches_labels(value, labels))
                    && options
                        .field_selector
                        .as_deref()
                        .is_none_or(|fields| selector::matches_fields(value, fields))
            })
            .map(|value| serde_json::from_value(value.clone()).map_err(GatewayError::from))
            .collect()
    }

    async fn create(&self, object: &K) -> Result<K, GatewayError> {
        let kind = kind_of::<K>();
        let name = require_name(object.meta().name.as_deref(), &kind)?.to_string();
        let mut value = serde_json::to_value(object)?;
        let namespace = object_namespace(&value);
        let mut state = self.lock();
        state.record(Verb::Create, &kind, namespace.as_deref(), &name, Some(value.clone()));
        if let Some(failure) = state.take_failure(Verb::Create, &kind) {
            return Err(failure.into_error(&kind, &name));
        }
        let object_key = key(&kind, namespace.as_deref(), &name);
        if state.objects.contains_key(&object_key) {
            return Err(GatewayError::Conflict(format!("{kind} {name} already exists")));
        }
        state.stamp_new(&mut value);
        state.react(&kind, Verb::Create, &mut value);
        state.objects.insert(object_key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update(&self, object: &K) -> Result<K, GatewayError> {
        let kind = kind_of::<K>();
        let name = require_name(object.meta().name.as_deref(), &kind)?.to_string();
        let incoming = serde_json::to_value(object)?;
        let namespace = object_namespace(&incoming);
        let expected_version = object.meta().resource_version.clone();
        self.write::<K>(Verb::Update, &name, namespace.as_deref(), Some(incoming.clone()), |stored| {
            let stored_version = stored["metadata"]["resourceVersion"].as_str().map(str::to_string);
            if expected_version.is_some() && expected_version != stored_version {
                return Err(GatewayError::Conflict(format!("{name} has been modified")));
            }
            let spec_changed = stored.get("spec") != incoming.get("spec");
            let status = stored.get("status").cloned();
            let metadata = stored["metadata"].clone();
            *stored = incoming;
            stored["metadata"]["uid"] = metadata["uid"].clone();
            stored["metadata"]["generation"] = metadata["generation"].clone();
            match status {
                Some(status) => stored["status"] = status,
                None => {
                    if let Value::Object(map) = stored {
                        map.remove("status");
                    }
                }
            }
            Ok(spec_changed)
        })
    }

    async fn update_status(&self, object: &K) -> Result<K, GatewayError> {
        let kind = kind_of::<K>();
        let name = require_name(object.meta().name.as_deref(), &kind)?.to_string();
        let incoming = serde_json::to_value(object)?;
        let namespace = object_namespace(&incoming);
        let status = incoming.get("status").cloned().unwrap_or(Value::Null);
        self.write::<K>(Verb::UpdateStatus, &name, namespace.as_deref(), Some(status.clone()), |stored| {
            stored["status"] = status;
            Ok(false)
        })
    }

    async fn patch(&self, name: &str, namespace: Option<&str>, patch: &PatchBody) -> Result<K, GatewayError> {
        let name = require_name(Some(name), &kind_of::<K>())?;
        self.write::<K>(Verb::Patch, name, namespace, Some(patch.body.clone()), |stored| {
            let before = stored.get("spec").cloned();
            merge::apply(stored, patch)?;
            Ok(stored.get("spec").cloned() != before)
        })
    }

    async fn patch_status(&self, name: &str, namespace: Option<&str>, patch: &PatchBody) -> Result<K, GatewayError> {
        let name = require_name(Some(name), &kind_of::<K>())?;
        self.write::<K>(Verb::PatchStatus, name, namespace, Some(patch.body.clone()), |stored| {
            let mut status = json!({ "status": stored.get("status").cloned().unwrap_or(Value::Null) });
            merge::apply(&mut status, patch)?;
            stored["status"] = status["status"].take();
            Ok(false)
        })
    }

    async fn delete(&self, name: &str, namespace: Option<&str>) -> Result<(), GatewayError> {
        let kind = kind_of::<K>();
        let name = require_name(Some(name), &kind)?;
        let mut state = self.lock();
        state.record(Verb::Delete, &kind, namespace, name, None);
        if let Some(failure) = state.take_failure(Verb::Delete, &kind) {
            return Err(failure.into_error(&kind, name));
        }
        match state.objects.remove(&key(&kind, namespace, name)) {
            Some(_) => Ok(()),
            None => Err(GatewayError::NotFound {
                kind,
                name: name.to_string(),
            }),
        }
    }
}

#[async_trait::async_trait]
impl PodExec for MockCluster {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        _container: Option<&str>,
        command: &[String],
    ) -> Result<String, GatewayError> {
        let pod = require_name(Some(pod), "Pod")?;
        let mut state = self.lock();
        state.record(Verb::Exec, "Pod", Some(namespace), pod, Some(json!(command)));
        if let Some(failure) = state.take_failure(Verb::Exec, "Pod") {
            return Err(failure.into_error("Pod", pod));
        }
        let response = match state.exec_responses.pop_front() {
            Some(response) => response,
            None => state
                .default_exec
                .clone()
                .ok_or_else(|| GatewayError::Exec(format!("no exec response scripted for {pod}")))?,
        };
        response.map_err(|failure| failure.into_error("Pod", pod))
    }
}

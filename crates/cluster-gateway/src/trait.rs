//! Gateway traits for mocking
//!
//! `ResourceGateway<K>` is the single accessor used for every resource kind.
//! The concrete `KubeGateway` implements it for all supported kinds and
//! tests use `MockCluster`.

use crate::error::GatewayError;
use serde_json::Value;

/// Label and field selectors for list calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Equality-based label selector, e.g. `"app=a,tier=b"`
    pub label_selector: Option<String>,
    /// Field selector, e.g. `"metadata.name=x"`
    pub field_selector: Option<String>,
}

impl ListOptions {
    /// Select by label
    pub fn labels(selector: impl Into<String>) -> Self {
        Self {
            label_selector: Some(selector.into()),
            field_selector: None,
        }
    }

    /// Add a field selector
    #[must_use]
    pub fn with_fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }
}

/// Patch flavour understood by the API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// RFC 7386 JSON merge patch
    Merge,
    /// Kubernetes strategic merge patch
    StrategicMerge,
    /// RFC 6902 JSON patch (body must be an operation array)
    Json,
}

/// Patch body plus its flavour
#[derive(Debug, Clone, PartialEq)]
pub struct PatchBody {
    pub kind: PatchKind,
    pub body: Value,
}

impl PatchBody {
    pub fn merge(body: Value) -> Self {
        Self { kind: PatchKind::Merge, body }
    }

    pub fn strategic(body: Value) -> Self {
        Self {
            kind: PatchKind::StrategicMerge,
            body,
        }
    }

    pub fn json(body: Value) -> Self {
        Self { kind: PatchKind::Json, body }
    }
}

/// Typed access to one resource kind
///
/// Namespace `None` addresses cluster-scoped kinds (or all namespaces for
/// list). Create and update take the namespace from the object metadata.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ResourceGateway<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<K, GatewayError>;
    async fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<Vec<K>, GatewayError>;
    async fn create(&self, object: &K) -> Result<K, GatewayError>;
    async fn update(&self, object: &K) -> Result<K, GatewayError>;
    /// Write only the status of `object`
    async fn update_status(&self, object: &K) -> Result<K, GatewayError>;
    async fn patch(&self, name: &str, namespace: Option<&str>, patch: &PatchBody) -> Result<K, GatewayError>;
    async fn patch_status(&self, name: &str, namespace: Option<&str>, patch: &PatchBody) -> Result<K, GatewayError>;
    async fn delete(&self, name: &str, namespace: Option<&str>) -> Result<(), GatewayError>;
}

/// Command execution inside a running pod
#[async_trait::async_trait]
pub trait PodExec: Send + Sync {
    /// Run `command` in `pod` and return its stdout
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> Result<String, GatewayError>;
}

/// Reject empty names before they reach the transport
pub(crate) fn require_name<'a>(name: Option<&'a str>, kind: &str) -> Result<&'a str, GatewayError> {
    match name {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(GatewayError::Invalid(format!("missing name for {kind}"))),
    }
}

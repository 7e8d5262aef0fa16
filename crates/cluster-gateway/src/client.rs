//! Kubernetes-backed gateway
//!
//! The client handle is built on first use and cached for the lifetime of
//! the gateway. A handle can be injected up front with [`KubeGateway::with_client`].

use crate::error::GatewayError;
use crate::gateway_trait::{ListOptions, PatchBody, PatchKind, PodExec, ResourceGateway, require_name};
use crate::scope::ApiScope;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::debug;

/// Gateway backed by a live API server
pub struct KubeGateway {
    kubeconfig: Option<PathBuf>,
    client: OnceCell<Client>,
}

impl std::fmt::Debug for KubeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeGateway")
            .field("kubeconfig", &self.kubeconfig)
            .field("client_initialized", &self.client.initialized())
            .finish()
    }
}

impl KubeGateway {
    /// Gateway that loads `kubeconfig` when given, otherwise infers the
    /// in-cluster or local configuration
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubeconfig,
            client: OnceCell::new(),
        }
    }

    /// Gateway around an already constructed client
    pub fn with_client(client: Client) -> Self {
        Self {
            kubeconfig: None,
            client: OnceCell::new_with(Some(client)),
        }
    }

    /// Shared client handle, initialised at most once
    pub async fn client(&self) -> Result<Client, GatewayError> {
        self.client
            .get_or_try_init(|| build_client(self.kubeconfig.as_deref()))
            .await
            .cloned()
    }

    async fn api<K: ApiScope>(&self, namespace: Option<&str>) -> Result<Api<K>, GatewayError> {
        Ok(K::api(self.client().await?, namespace))
    }
}

async fn build_client(kubeconfig: Option<&Path>) -> Result<Client, GatewayError> {
    let config = match kubeconfig {
        Some(path) => {
            debug!("Loading kubeconfig from {}", path.display());
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| GatewayError::Transport(format!("failed to read kubeconfig: {e}")))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| GatewayError::Transport(format!("invalid kubeconfig: {e}")))?
        }
        None => Config::infer()
            .await
            .map_err(|e| GatewayError::Transport(format!("failed to infer cluster config: {e}")))?,
    };
    Ok(Client::try_from(config)?)
}

fn kube_patch(patch: &PatchBody) -> Result<Patch<Value>, GatewayError> {
    Ok(match patch.kind {
        PatchKind::Merge => Patch::Merge(patch.body.clone()),
        PatchKind::StrategicMerge => Patch::Strategic(patch.body.clone()),
        PatchKind::Json => Patch::Json(serde_json::from_value::<json_patch::Patch>(patch.body.clone())?),
    })
}

#[async_trait::async_trait]
impl<K: ApiScope> ResourceGateway<K> for KubeGateway {
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<K, GatewayError> {
        let kind = K::kind(&());
        let name = require_name(Some(name), &kind)?;
        let api = self.api::<K>(namespace).await?;
        api.get(name).await.map_err(|e| GatewayError::from_kube(e, &kind, name))
    }

    async fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<Vec<K>, GatewayError> {
        let mut params = ListParams::default();
        if let Some(labels) = &options.label_selector {
            params = params.labels(labels);
        }
        if let Some(fields) = &options.field_selector {
            params = params.fields(fields);
        }
        let api = self.api::<K>(namespace).await?;
        let list = api
            .list(&params)
            .await
            .map_err(|e| GatewayError::from_kube(e, &K::kind(&()), ""))?;
        Ok(list.items)
    }

    async fn create(&self, object: &K) -> Result<K, GatewayError> {
        let kind = K::kind(&());
        let name = require_name(object.meta().name.as_deref(), &kind)?;
        let api = self.api::<K>(object.meta().namespace.as_deref()).await?;
        api.create(&PostParams::default(), object)
            .await
            .map_err(|e| GatewayError::from_kube(e, &kind, name))
    }

    async fn update(&self, object: &K) -> Result<K, GatewayError> {
        let kind = K::kind(&());
        let name = require_name(object.meta().name.as_deref(), &kind)?;
        let api = self.api::<K>(object.meta().namespace.as_deref()).await?;
        api.replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| GatewayError::from_kube(e, &kind, name))
    }

    async fn update_status(&self, object: &K) -> Result<K, GatewayError> {
        let kind = K::kind(&());
        let name = require_name(object.meta().name.as_deref(), &kind)?;
        let status = serde_json::to_value(object)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let api = self.api::<K>(object.meta().namespace.as_deref()).await?;
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(json!({ "status": status })))
            .await
            .map_err(|e| GatewayError::from_kube(e, &kind, name))
    }

    async fn patch(&self, name: &str, namespace: Option<&str>, patch: &PatchBody) -> Result<K, GatewayError> {
        let kind = K::kind(&());
        let name = require_name(Some(name), &kind)?;
        let body = kube_patch(patch)?;
        let api = self.api::<K>(namespace).await?;
        api.patch(name, &PatchParams::default(), &body)
            .await
            .map_err(|e| GatewayError::from_kube(e, &kind, name))
    }

    async fn patch_status(&self, name: &str, namespace: Option<&str>, patch: &PatchBody) -> Result<K, GatewayError> {
        let kind = K::kind(&());
        let name = require_name(Some(name), &kind)?;
        let body = kube_patch(patch)?;
        let api = self.api::<K>(namespace).await?;
        api.patch_status(name, &PatchParams::default(), &body)
            .await
            .map_err(|e| GatewayError::from_kube(e, &kind, name))
    }

    async fn delete(&self, name: &str, namespace: Option<&str>) -> Result<(), GatewayError> {
        let kind = K::kind(&());
        let name = require_name(Some(name), &kind)?;
        let api = self.api::<K>(namespace).await?;
        api.delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::from_kube(e, &kind, name))
    }
}

#[async_trait::async_trait]
impl PodExec for KubeGateway {
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        command: &[String],
    ) -> Result<String, GatewayError> {
        let pod = require_name(Some(pod), "Pod")?;
        let api: Api<Pod> = Api::namespaced(self.client().await?, namespace);
        let mut params = AttachParams::default().stdout(true).stderr(false);
        if let Some(container) = container {
            params = params.container(container);
        }
        debug!("Exec in {}/{}: {:?}", namespace, pod, command);
        let mut process = api
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| GatewayError::from_kube(e, "Pod", pod))?;

        let mut output = String::new();
        if let Some(mut stdout) = process.stdout() {
            stdout
                .read_to_string(&mut output)
                .await
                .map_err(|e| GatewayError::Exec(e.to_string()))?;
        }
        process.join().await.map_err(|e| GatewayError::Exec(e.to_string()))?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_patch_body_is_parsed() {
        let body = PatchBody::json(json!([{ "op": "replace", "path": "/spec/replicas", "value": 0 }]));
        assert!(matches!(kube_patch(&body).unwrap(), Patch::Json(_)));
    }

    #[test]
    fn test_malformed_json_patch_is_rejected() {
        let body = PatchBody::json(json!({ "spec": { "replicas": 0 } }));
        assert!(matches!(kube_patch(&body), Err(GatewayError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_empty_name_fails_before_client_is_built() {
        let gateway = KubeGateway::new(Some(PathBuf::from("/nonexistent/kubeconfig")));
        let result = ResourceGateway::<crds::Pool>::get(&gateway, "", None).await;
        assert!(matches!(result, Err(GatewayError::Invalid(_))));
    }
}

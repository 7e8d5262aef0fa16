//! Workload lookups and patches shared by the per-kind upgrades

use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use cluster_gateway::{ClusterClients, ListOptions, PatchBody, PatchKind};
use crds::labels::{PERSISTENT_VOLUME_LABEL, VERSION_LABEL, label};
use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;
use serde_json::json;
use tracing::info;
use workload_patcher::templates::SERVICE_VERSION_PATCH;
use workload_patcher::{DeploymentPatcher, PatchError, TemplateParams, render};

/// `openebs.io/persistent-volume=<pv>`
pub fn pv_selector(pv_name: &str) -> String {
    format!("{PERSISTENT_VOLUME_LABEL}={pv_name}")
}

pub fn object_name<K: Resource>(object: &K) -> String {
    object.meta().name.clone().unwrap_or_default()
}

/// Value of the version label, empty when missing
pub fn version_label<K: Resource>(object: &K) -> &str {
    label(object.meta(), VERSION_LABEL).unwrap_or_default()
}

/// Version label of a deployment, which must be present
pub fn require_version(deployment: &Deployment) -> Result<String, UpgradeError> {
    match version_label(deployment) {
        "" => Err(UpgradeError::Precondition(format!(
            "missing openebs version for {}",
            object_name(deployment)
        ))),
        version => Ok(version.to_string()),
    }
}

/// Ready replicas must match the requested replica count
pub fn verify_ready(deployment: &Deployment) -> Result<(), UpgradeError> {
    let desired = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas)
        .unwrap_or(0);
    if ready == desired {
        Ok(())
    } else {
        Err(UpgradeError::Precondition(format!(
            "deployment {} is not ready, {} of {} replicas ready",
            object_name(deployment),
            ready,
            desired
        )))
    }
}

/// Ready deployments matching `selector` in `namespace`; at least one must exist
pub async fn list_deployments(
    clients: &ClusterClients,
    selector: &str,
    namespace: &str,
) -> Result<Vec<Deployment>, UpgradeError> {
    let deployments = clients
        .deployments
        .list(Some(namespace), &ListOptions::labels(selector))
        .await?;
    if deployments.is_empty() {
        return Err(UpgradeError::Precondition(format!(
            "no deployments found for {selector} in {namespace}"
        )));
    }
    for deployment in &deployments {
        verify_ready(deployment)?;
    }
    Ok(deployments)
}

/// First ready deployment matching `selector` in `namespace`
pub async fn get_deployment(
    clients: &ClusterClients,
    selector: &str,
    namespace: &str,
) -> Result<Deployment, UpgradeError> {
    let mut deployments = list_deployments(clients, selector, namespace).await?;
    Ok(deployments.swap_remove(0))
}

/// Namespace holding the workloads of volume `pv_name`
///
/// The control plane namespace wins when it holds any; otherwise the
/// namespace of the volume's claim.
pub async fn resolve_namespace(
    clients: &ClusterClients,
    pv_name: &str,
    config: &UpgradeConfig,
) -> Result<String, UpgradeError> {
    let selector = ListOptions::labels(pv_selector(pv_name));
    let in_control_plane = clients.deployments.list(Some(&config.namespace), &selector).await?;
    if !in_control_plane.is_empty() {
        return Ok(config.namespace.clone());
    }

    let pv = clients.persistent_volumes.get(pv_name, None).await?;
    let claim_namespace = pv
        .spec
        .and_then(|spec| spec.claim_ref)
        .and_then(|claim| claim.namespace)
        .filter(|namespace| !namespace.is_empty())
        .ok_or_else(|| UpgradeError::Precondition(format!("namespace missing for pv {pv_name}")))?;
    let in_claim = clients.deployments.list(Some(&claim_namespace), &selector).await?;
    if in_claim.is_empty() {
        return Err(UpgradeError::Precondition(format!(
            "failed to get deployments for pv {} in {} or {} namespace",
            pv_name, config.namespace, claim_namespace
        )));
    }
    Ok(claim_namespace)
}

/// Template parameters every patch shares
pub fn version_params(config: &UpgradeConfig) -> TemplateParams {
    TemplateParams {
        upgrade_version: config.to_version.clone(),
        current_version: config.from_version.clone(),
        image_tag: config.effective_image_tag(),
        base_dir: config.base_dir.clone(),
        ..TemplateParams::default()
    }
}

/// Render `template` into a patch body of flavour `kind`
pub fn render_patch(template: &str, params: &TemplateParams, kind: PatchKind) -> Result<PatchBody, UpgradeError> {
    let rendered = render(template, params)?;
    let body = serde_json::from_str(&rendered).map_err(PatchError::from)?;
    Ok(PatchBody { kind, body })
}

/// Move the version label of the service matching `selector` forward
pub async fn patch_service(
    clients: &ClusterClients,
    selector: &str,
    namespace: &str,
    config: &UpgradeConfig,
) -> Result<(), UpgradeError> {
    let services = clients
        .services
        .list(Some(namespace), &ListOptions::labels(selector))
        .await?;
    let service = services.first().ok_or_else(|| {
        UpgradeError::Precondition(format!("no service found for {selector} in {namespace}"))
    })?;
    let name = object_name(service);
    if name.is_empty() {
        return Err(UpgradeError::Precondition("missing service name".to_string()));
    }

    let version = version_label(service);
    config.check_version("service", version)?;
    if config.needs_upgrade(version) {
        let patch = render_patch(SERVICE_VERSION_PATCH, &version_params(config), PatchKind::StrategicMerge)?;
        clients.services.patch(&name, Some(namespace), &patch).await?;
        info!("Target service {} patched", name);
    } else {
        info!("Service {} already in {} version", name, config.to_version);
    }
    Ok(())
}

/// Scale deployment `name` to `replicas` and wait for the rollout
pub async fn scale_deployment(
    patcher: &DeploymentPatcher,
    name: &str,
    namespace: &str,
    replicas: i32,
) -> Result<(), UpgradeError> {
    let patch = PatchBody::merge(json!({ "spec": { "replicas": replicas } }));
    patcher.patch_deployment(name, namespace, &patch).await?;
    info!("Deployment {} scaled to {}", name, replicas);
    Ok(())
}

//! Container lookups on deployment pod templates

use crate::error::PatchError;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;

fn containers(deployment: &Deployment) -> &[Container] {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .map(|pod| pod.containers.as_slice())
        .unwrap_or_default()
}

/// Container `name` of the pod template
pub fn container<'a>(deployment: &'a Deployment, name: &str) -> Result<&'a Container, PatchError> {
    containers(deployment)
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| PatchError::MissingContainer(name.to_string()))
}

/// Whether the pod template runs a container called `name`
pub fn has_container(deployment: &Deployment, name: &str) -> bool {
    containers(deployment).iter().any(|c| c.name == name)
}

/// Name of the first container of the pod template
pub fn first_container_name(deployment: &Deployment) -> Result<String, PatchError> {
    match containers(deployment).first() {
        Some(container) if !container.name.is_empty() => Ok(container.name.clone()),
        Some(_) => Err(PatchError::MissingContainer("missing container name".to_string())),
        None => Err(PatchError::MissingContainer("missing container".to_string())),
    }
}

/// Image of container `name` without its tag
///
/// With `url_prefix`, the repository path is replaced so that only the
/// final path segment of the image is kept: `quay.io/openebs/jiva` with
/// prefix `registry.local/openebs/` becomes `registry.local/openebs/jiva`.
pub fn base_image(deployment: &Deployment, name: &str, url_prefix: Option<&str>) -> Result<String, PatchError> {
    let image = container(deployment, name)?.image.as_deref().unwrap_or_default();
    let base = image.rfind(':').map_or(image, |index| &image[..index]);
    match url_prefix.filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => {
            let last_segment = base.rsplit('/').next().unwrap_or(base);
            Ok(format!("{prefix}{last_segment}"))
        }
        None => Ok(base.to_string()),
    }
}

//! Deployment rollout status

use k8s_openapi::api::apps::v1::Deployment;

/// Outcome of one rollout check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutStatus {
    pub is_rolled_out: bool,
    pub message: String,
}

impl RolloutStatus {
    fn pending(message: String) -> Self {
        Self {
            is_rolled_out: false,
            message,
        }
    }
}

/// Rollout status of `deployment`
///
/// Checks run in order and the first failing one supplies the message:
/// spec observed, progress deadline, updated replicas, old replicas
/// terminated, updated replicas available.
pub fn rollout_status(deployment: &Deployment) -> RolloutStatus {
    let status = deployment.status.clone().unwrap_or_default();
    let generation = deployment.metadata.generation.unwrap_or(0);
    let observed_generation = status.observed_generation.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let replicas = status.replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    let desired = deployment.spec.as_ref().and_then(|spec| spec.replicas);

    if generation > observed_generation {
        return RolloutStatus::pending("Waiting for deployment spec update to be observed".to_string());
    }

    let deadline_exceeded = status.conditions.iter().flatten().any(|condition| {
        condition.type_ == "Progressing" && condition.reason.as_deref() == Some("ProgressDeadlineExceeded")
    });
    if deadline_exceeded {
        return RolloutStatus::pending("Deployment exceeded its progress deadline".to_string());
    }

    if let Some(desired) = desired.filter(|desired| updated < *desired) {
        return RolloutStatus::pending(format!(
            "Waiting for deployment rollout to finish: {updated} out of {desired} new replicas have been updated"
        ));
    }

    if replicas > updated {
        return RolloutStatus::pending(format!(
            "Waiting for deployment rollout to finish: {} old replicas are pending termination",
            replicas - updated
        ));
    }

    if available < updated {
        return RolloutStatus::pending(format!(
            "Waiting for deployment rollout to finish: {available} of {updated} updated replicas are available"
        ));
    }

    RolloutStatus {
        is_rolled_out: true,
        message: "Deployment successfully rolled out".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(generation: i64, status: serde_json::Value) -> Deployment {
        serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "d1", "generation": generation },
            "spec": {
                "replicas": 2,
                "selector": { "matchLabels": { "app": "d1" } },
                "template": { "spec": { "containers": [] } }
            },
            "status": status
        }))
        .unwrap()
    }

    #[test]
    fn test_converged_deployment_is_rolled_out() {
        let d = deployment(
            3,
            json!({ "observedGeneration": 3, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 2 }),
        );
        assert!(rollout_status(&d).is_rolled_out);
    }

    #[test]
    fn test_unobserved_generation() {
        let d = deployment(4, json!({ "observedGeneration": 3 }));
        let status = rollout_status(&d);
        assert!(!status.is_rolled_out);
        assert_eq!(status.message, "Waiting for deployment spec update to be observed");
    }

    #[test]
    fn test_progress_deadline_exceeded() {
        let d = deployment(
            1,
            json!({
                "observedGeneration": 1, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 2,
                "conditions": [{ "type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded" }]
            }),
        );
        assert_eq!(rollout_status(&d).message, "Deployment exceeded its progress deadline");
    }

    #[test]
    fn test_each_replica_condition_has_its_own_message() {
        let partial = deployment(1, json!({ "observedGeneration": 1, "replicas": 2, "updatedReplicas": 1 }));
        assert!(rollout_status(&partial).message.contains("1 out of 2 new replicas"));

        let terminating = deployment(
            1,
            json!({ "observedGeneration": 1, "replicas": 3, "updatedReplicas": 2, "availableReplicas": 2 }),
        );
        assert!(rollout_status(&terminating).message.contains("1 old replicas are pending termination"));

        let unavailable = deployment(
            1,
            json!({ "observedGeneration": 1, "replicas": 2, "updatedReplicas": 2, "availableReplicas": 1 }),
        );
        let status = rollout_status(&unavailable);
        assert!(!status.is_rolled_out);
        assert!(status.message.contains("1 of 2 updated replicas are available"));
    }
}

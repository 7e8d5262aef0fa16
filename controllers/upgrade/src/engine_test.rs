//! Scenario tests for complete upgrade runs against the mock cluster

#[cfg(test)]
mod tests {
    use crate::config::UpgradeConfig;
    use crate::engine::Upgrader;
    use crate::error::UpgradeError;
    use crate::test_utils::{FROM, Harness, NAMESPACE, TO, pod, pool_claim};
    use cluster_gateway::{ListOptions, MockFailure, ResourceGateway, Verb};
    use crds::labels::{STORAGE_POOL_CLAIM_LABEL, VERSION_LABEL};
    use crds::{Pool, StepPhase, StoragePoolClaim, UpgradePhase, UpgradeStep, UpgradeTask, UpgradeTaskStatus, Versioned};
    use crds::{Volume, VolumeReplica};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{Pod, Service};
    use workload_patcher::container;

    fn task_status(harness: &Harness, name: &str) -> UpgradeTaskStatus {
        harness
            .cluster
            .object::<UpgradeTask>(name, Some(NAMESPACE))
            .and_then(|task| task.status)
            .unwrap()
    }

    fn steps(status: &UpgradeTaskStatus) -> Vec<(UpgradeStep, StepPhase)> {
        status
            .upgrade_detailed_statuses
            .iter()
            .map(|entry| (entry.step, entry.phase))
            .collect()
    }

    fn deployment(harness: &Harness, name: &str) -> Deployment {
        harness.cluster.object(name, Some(NAMESPACE)).unwrap()
    }

    fn version_of(deployment: &Deployment) -> Option<String> {
        deployment
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(VERSION_LABEL))
            .cloned()
    }

    fn image(deployment: &Deployment, name: &str) -> String {
        container(deployment, name).unwrap().image.clone().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_jiva_volume_upgrade() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);
        let mut upgrader = harness.upgrader();

        upgrader.exec("jivaVolume", "pv1").await.unwrap();

        let status = task_status(&harness, "upgrade-jiva-volume-pv1");
        assert_eq!(status.phase, Some(UpgradePhase::Success));
        assert_eq!(status.retries, 0);
        assert!(status.completed_time.is_some());
        assert_eq!(
            steps(&status),
            vec![
                (UpgradeStep::PreUpgrade, StepPhase::Completed),
                (UpgradeStep::ReplicaUpgrade, StepPhase::Completed),
                (UpgradeStep::TargetUpgrade, StepPhase::Completed),
                (UpgradeStep::Verify, StepPhase::Completed),
            ]
        );
        let starts: Vec<_> = status
            .upgrade_detailed_statuses
            .iter()
            .map(|entry| entry.start_time)
            .collect();
        assert!(starts.windows(2).all(|pair| pair[0] <= pair[1]));
        // Open, eight step transitions and the final phase
        assert_eq!(harness.cluster.count(Verb::UpdateStatus, "UpgradeTask"), 10);

        let controller = deployment(&harness, "pv1-ctrl");
        assert_eq!(version_of(&controller).as_deref(), Some(TO));
        assert_eq!(image(&controller, "pv1-ctrl-con"), "quay.io/openebs/jiva:1.6.0");
        assert_eq!(image(&controller, "maya-volume-exporter"), "quay.io/openebs/m-exporter:1.6.0");
        assert_eq!(controller.spec.as_ref().and_then(|spec| spec.replicas), Some(1));
        for index in 0..3 {
            let replica = deployment(&harness, &format!("pv1-rep-{index}"));
            assert_eq!(version_of(&replica).as_deref(), Some(TO));
            assert_eq!(image(&replica, "pv1-rep-con"), "quay.io/openebs/jiva:1.6.0");
        }
        let service: Service = harness.cluster.object("pv1-ctrl-svc", Some(NAMESPACE)).unwrap();
        assert_eq!(
            service.metadata.labels.unwrap().get(VERSION_LABEL).map(String::as_str),
            Some(TO)
        );

        let exec = harness.cluster.calls_for("Pod");
        let exec = exec.iter().find(|call| call.verb == Verb::Exec).unwrap();
        assert_eq!(exec.name, "pv1-ctrl-pod");
        assert_eq!(
            exec.body,
            Some(serde_json::json!(["curl", "http://localhost:9501/v1/replicas"]))
        );
        assert_eq!(upgrader.config().base_dir, "/var/openebs-test");
    }

    #[tokio::test]
    async fn test_jiva_replicas_are_patched_while_controller_is_down() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);

        harness.upgrader().exec("jivaVolume", "pv1").await.unwrap();

        let patches: Vec<_> = harness
            .cluster
            .calls_for("Deployment")
            .into_iter()
            .filter(|call| call.verb == Verb::Patch)
            .map(|call| call.name)
            .collect();
        assert_eq!(
            patches,
            vec!["pv1-ctrl", "pv1-rep-0", "pv1-rep-1", "pv1-rep-2", "pv1-ctrl"]
        );
    }

    #[tokio::test]
    async fn test_second_run_patches_nothing() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);
        harness.upgrader().exec("jivaVolume", "pv1").await.unwrap();
        let patches = harness.cluster.count(Verb::Patch, "Deployment");
        let service_patches = harness.cluster.count(Verb::Patch, "Service");

        harness.upgrader().exec("jivaVolume", "pv1").await.unwrap();

        assert_eq!(harness.cluster.count(Verb::Patch, "Deployment"), patches);
        assert_eq!(harness.cluster.count(Verb::Patch, "Service"), service_patches);
        let status = task_status(&harness, "upgrade-jiva-volume-pv1");
        assert_eq!(status.phase, Some(UpgradePhase::Success));
        assert_eq!(status.upgrade_detailed_statuses.len(), 4);
    }

    #[tokio::test]
    async fn test_forbidden_sync_check_still_succeeds() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);
        harness.cluster.fail_next::<Pod>(Verb::Exec, MockFailure::Forbidden);

        harness.upgrader().exec("jivaVolume", "pv1").await.unwrap();

        let status = task_status(&harness, "upgrade-jiva-volume-pv1");
        assert_eq!(status.phase, Some(UpgradePhase::Success));
        let verify = status.upgrade_detailed_statuses.last().unwrap();
        assert_eq!(verify.step, UpgradeStep::Verify);
        assert_eq!(verify.phase, StepPhase::Completed);
        assert_eq!(
            verify.message,
            "Replica sync was not verified, exec into the target pod is forbidden"
        );
    }

    #[tokio::test]
    async fn test_replica_sync_waits_for_all_replicas() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);
        harness.cluster.script_exec(Ok(crate::test_utils::replica_status(1, 2)));
        harness.cluster.script_exec(Ok(crate::test_utils::replica_status(2, 1)));

        harness.upgrader().exec("jivaVolume", "pv1").await.unwrap();

        assert_eq!(harness.cluster.count(Verb::Exec, "Pod"), 3);
    }

    #[tokio::test]
    async fn test_broken_sync_response_fails_verify() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);
        harness.cluster.default_exec(Ok("not json".to_string()));

        let result = harness.upgrader().exec("jivaVolume", "pv1").await;

        assert!(matches!(result, Err(UpgradeError::ReplicaStatus(_))));
        let status = task_status(&harness, "upgrade-jiva-volume-pv1");
        let verify = status.upgrade_detailed_statuses.last().unwrap();
        assert_eq!((verify.step, verify.phase), (UpgradeStep::Verify, StepPhase::Errored));
        assert!(verify.message.starts_with("failed to verify synced replicas"));
        assert_eq!(status.retries, 1);
    }

    #[tokio::test]
    async fn test_cstor_volume_waits_for_pool_upgrade() {
        let harness = Harness::new();
        harness.seed_cstor_volume("pv2", FROM, &[("cstor-pool-a", FROM)]);
        harness.set_backoff_limit(2);

        let first = harness.upgrader().exec("cstorVolume", "pv2").await;
        assert!(matches!(first, Err(UpgradeError::Precondition(_))));
        let status = task_status(&harness, "upgrade-cstor-volume-pv2");
        assert_eq!(status.retries, 1);
        assert_eq!(status.phase, Some(UpgradePhase::Started));
        assert!(status.completed_time.is_none());
        let entry = &status.upgrade_detailed_statuses[0];
        assert_eq!((entry.step, entry.phase), (UpgradeStep::PreUpgrade, StepPhase::Errored));
        assert_eq!(entry.message, "failed to verify csp for cstor volume");
        assert_eq!(entry.reason, "csp deployment cstor-pool-a not in 1.6.0 version");

        let second = harness.upgrader().exec("cstorVolume", "pv2").await;
        assert!(second.is_err());
        let status = task_status(&harness, "upgrade-cstor-volume-pv2");
        assert_eq!(status.retries, 2);
        assert_eq!(status.phase, Some(UpgradePhase::Error));
        assert!(status.completed_time.is_some());
        assert_eq!(harness.cluster.count(Verb::Patch, "Deployment"), 0);
    }

    #[tokio::test]
    async fn test_cstor_volume_upgrade() {
        let harness = Harness::new();
        harness.seed_cstor_volume("pv3", FROM, &[("cstor-pool-a", TO), ("cstor-pool-b", TO)]);

        harness.upgrader().exec("cstorVolume", "pv3").await.unwrap();

        let status = task_status(&harness, "upgrade-cstor-volume-pv3");
        assert_eq!(status.phase, Some(UpgradePhase::Success));
        assert_eq!(
            steps(&status),
            vec![
                (UpgradeStep::PreUpgrade, StepPhase::Completed),
                (UpgradeStep::ReplicaUpgrade, StepPhase::Completed),
                (UpgradeStep::TargetUpgrade, StepPhase::Completed),
            ]
        );
        for pool in ["cstor-pool-a", "cstor-pool-b"] {
            let replica: VolumeReplica = harness
                .cluster
                .object(&format!("pv3-{pool}"), Some(NAMESPACE))
                .unwrap();
            assert_eq!(replica.current_version(), TO);
        }
        let volume: Volume = harness.cluster.object("pv3", Some(NAMESPACE)).unwrap();
        assert_eq!(volume.current_version(), TO);

        let target = deployment(&harness, "pv3-target");
        assert_eq!(version_of(&target).as_deref(), Some(TO));
        assert_eq!(image(&target, "cstor-istgt"), "quay.io/openebs/cstor-istgt:1.6.0");
        assert_eq!(image(&target, "cstor-volume-mgmt"), "quay.io/openebs/cstor-volume-mgmt:1.6.0");
        // Targets older than 1.8.0 get their shared directory under the advertised base directory
        let volumes = target
            .spec
            .and_then(|spec| spec.template.spec)
            .and_then(|pod| pod.volumes)
            .unwrap_or_default();
        let tmp = volumes.iter().find(|volume| volume.name == "tmp").unwrap();
        assert_eq!(
            tmp.host_path.as_ref().map(|path| path.path.as_str()),
            Some("/var/openebs-test/shared-pv3-target")
        );
    }

    #[tokio::test]
    async fn test_cstor_pool_upgrade() {
        let harness = Harness::new();
        harness.seed_cstor_pool("pool-a", "spc1", "node-1", FROM);

        harness.upgrader().exec("cstorPool", "pool-a").await.unwrap();

        let status = task_status(&harness, "upgrade-cstor-pool-pool-a");
        assert_eq!(status.phase, Some(UpgradePhase::Success));
        assert_eq!(
            steps(&status),
            vec![
                (UpgradeStep::PreUpgrade, StepPhase::Completed),
                (UpgradeStep::PoolInstanceUpgrade, StepPhase::Completed),
            ]
        );
        let pool: Pool = harness.cluster.object("pool-a", None).unwrap();
        assert_eq!(pool.current_version(), TO);
        let deployment = deployment(&harness, "pool-a");
        assert_eq!(version_of(&deployment).as_deref(), Some(TO));
        assert_eq!(image(&deployment, "cstor-pool"), "quay.io/openebs/cstor-pool:1.6.0");
        assert_eq!(image(&deployment, "cstor-pool-mgmt"), "quay.io/openebs/cstor-pool-mgmt:1.6.0");
        assert_eq!(image(&deployment, "maya-exporter"), "quay.io/openebs/m-exporter:1.6.0");
    }

    #[tokio::test]
    async fn test_pool_claim_upgrades_each_pool() {
        let harness = Harness::new();
        harness.seed_cstor_pool("pool-a", "spc1", "node-1", FROM);
        harness.seed_cstor_pool("pool-b", "spc1", "node-2", FROM);
        harness.cluster.insert(&pool_claim("spc1", FROM));

        harness.upgrader().exec("storagePoolClaim", "spc1").await.unwrap();

        for pool in ["pool-a", "pool-b"] {
            let status = task_status(&harness, &format!("upgrade-cstor-pool-{pool}"));
            assert_eq!(status.phase, Some(UpgradePhase::Success));
        }
        assert!(
            harness
                .cluster
                .object::<UpgradeTask>("upgrade-cstor-spc-spc1", Some(NAMESPACE))
                .is_none()
        );
        let claim: StoragePoolClaim = harness.cluster.object("spc1", None).unwrap();
        assert_eq!(claim.current_version(), TO);
    }

    #[tokio::test]
    async fn test_pool_claim_follows_list_order() {
        let harness = Harness::new();
        harness.seed_cstor_pool("pool-c", "spc1", "node-3", FROM);
        harness.seed_cstor_pool("pool-a", "spc1", "node-1", FROM);
        harness.seed_cstor_pool("pool-b", "spc1", "node-2", FROM);
        harness.cluster.insert(&pool_claim("spc1", FROM));
        let listed: Vec<String> = harness
            .clients()
            .pools
            .list(None, &ListOptions::labels(format!("{STORAGE_POOL_CLAIM_LABEL}=spc1")))
            .await
            .unwrap()
            .iter()
            .map(|pool| format!("upgrade-cstor-pool-{}", pool.metadata.name.clone().unwrap_or_default()))
            .collect();

        harness.upgrader().exec("storagePoolClaim", "spc1").await.unwrap();

        let created: Vec<String> = harness
            .cluster
            .calls_for("UpgradeTask")
            .into_iter()
            .filter(|call| call.verb == Verb::Create)
            .map(|call| call.name)
            .collect();
        assert_eq!(created, listed);
    }

    #[tokio::test]
    async fn test_pool_claim_failure_is_charged_to_the_failing_pool() {
        let harness = Harness::new();
        harness.seed_cstor_pool("pool-a", "spc1", "node-1", FROM);
        harness.seed_cstor_pool("pool-b", "spc1", "node-2", "1.2.0");
        harness.cluster.insert(&pool_claim("spc1", FROM));

        let result = harness.upgrader().exec("storagePoolClaim", "spc1").await;

        assert!(result.is_err());
        assert_eq!(
            task_status(&harness, "upgrade-cstor-pool-pool-a").phase,
            Some(UpgradePhase::Success)
        );
        let failed = task_status(&harness, "upgrade-cstor-pool-pool-b");
        assert_eq!(failed.retries, 1);
        let entry = failed.upgrade_detailed_statuses.last().unwrap();
        assert_eq!(entry.message, "failed to verify cstor pool");
        assert_eq!(entry.reason, "cstor pool pool-b version 1.2.0 is neither 1.3.0 nor 1.6.0");
        let claim: StoragePoolClaim = harness.cluster.object("spc1", None).unwrap();
        assert_eq!(claim.current_version(), FROM);
    }

    #[tokio::test]
    async fn test_pool_claim_with_shared_node_is_refused() {
        let harness = Harness::new();
        harness.seed_cstor_pool("pool-a", "spc1", "node-1", FROM);
        harness.seed_cstor_pool("pool-b", "spc1", "node-1", FROM);

        let result = harness.upgrader().exec("storagePoolClaim", "spc1").await;

        assert_eq!(
            result.unwrap_err().to_string(),
            "pools pool-a and pool-b of spc1 are on the same node node-1"
        );
        assert_eq!(harness.cluster.count(Verb::Create, "UpgradeTask"), 0);
    }

    #[tokio::test]
    async fn test_control_plane_behind_target_fails_pre_upgrade() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);
        harness.cluster.insert(&pod(
            "maya-apiserver-0",
            NAMESPACE,
            &[("name", "maya-apiserver"), (VERSION_LABEL, FROM)],
            &[],
        ));

        let result = harness.upgrader().exec("jivaVolume", "pv1").await;

        assert!(result.is_err());
        let status = task_status(&harness, "upgrade-jiva-volume-pv1");
        let entry = &status.upgrade_detailed_statuses[0];
        assert_eq!((entry.step, entry.phase), (UpgradeStep::PreUpgrade, StepPhase::Errored));
        assert_eq!(entry.message, "failed to verify maya-apiserver pod");
        assert_eq!(entry.reason, "maya-apiserver deployment is in 1.3.0 but required version is 1.6.0");
        assert_eq!(status.retries, 1);
        assert_eq!(harness.cluster.count(Verb::Patch, "Deployment"), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_touches_nothing() {
        let harness = Harness::new();
        let mut config = harness.config();
        config.from_version = "2.0.0".to_string();
        let mut upgrader = Upgrader::new(harness.clients(), config);
        let result = upgrader.exec("jivaVolume", "pv1").await;
        assert_eq!(result.unwrap_err().to_string(), "invalid current version 2.0.0");

        let mut upgrader = harness.upgrader();
        let result = upgrader.exec("cstorCspc", "pv1").await;
        assert!(matches!(result, Err(UpgradeError::InvalidKind)));

        assert!(harness.cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_journal_errors_are_ignored_without_task_label() {
        let harness = Harness::new();
        harness.seed_jiva_volume("pv1", FROM);
        harness
            .cluster
            .fail_always::<UpgradeTask>(Verb::UpdateStatus, MockFailure::Transport("refused".to_string()));
        let mut config: UpgradeConfig = harness.config();
        config.task_label_present = false;

        Upgrader::new(harness.clients(), config)
            .exec("jivaVolume", "pv1")
            .await
            .unwrap();

        let controller = deployment(&harness, "pv1-ctrl");
        assert_eq!(version_of(&controller).as_deref(), Some(TO));
    }
}

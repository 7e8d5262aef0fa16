//! Upgrade task journal.
//!
//! Every step of an upgrade is recorded on the `UpgradeTask` of the
//! resource so a restarted job can tell how far the previous attempt got.
//! A waiting entry starts a step and is appended. Any other phase replaces
//! the tail entry and keeps its start time, so a step that went
//! waiting → completed leaves a single entry behind.
//!
//! When the upgrade runs as a labelled job, journal write failures abort
//! the upgrade. Otherwise they are logged and the upgrade carries on.

use crate::config::{ResourceKind, UpgradeConfig};
use crate::error::{UpgradeError, strip_colons};
use chrono::Utc;
use cluster_gateway::ResourceGateway;
use crds::{
    PoolClaimTarget, PoolTarget, ResourceSpec, StepPhase, UpgradeDetailedStatus, UpgradePhase, UpgradeStep,
    UpgradeTask, UpgradeTaskSpec, VolumeTarget,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Step journal of one upgrade task
pub struct Journal {
    tasks: Arc<dyn ResourceGateway<UpgradeTask>>,
    task: Option<UpgradeTask>,
    fatal: bool,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("task", &self.task.as_ref().and_then(|t| t.metadata.name.as_deref()))
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

/// Whether `entry` may be written
///
/// Step and phase must be set, every phase except waiting needs a message
/// and an errored entry needs a reason.
pub fn validate(entry: &UpgradeDetailedStatus) -> Result<(), UpgradeError> {
    let valid = entry.step != UpgradeStep::Unspecified
        && entry.phase != StepPhase::Unspecified
        && (entry.phase == StepPhase::Waiting || !entry.message.is_empty())
        && (entry.phase != StepPhase::Errored || !entry.reason.is_empty());
    if valid {
        Ok(())
    } else {
        Err(UpgradeError::InvalidJournalEntry(format!(
            "{{step {} phase {:?} message {:?} reason {:?}}}",
            entry.step, entry.phase, entry.message, entry.reason
        )))
    }
}

fn build_task(kind: ResourceKind, name: &str, config: &UpgradeConfig) -> UpgradeTask {
    let resource = match kind {
        ResourceKind::JivaVolume => ResourceSpec {
            jiva_volume: Some(VolumeTarget {
                pv_name: name.to_string(),
                options: None,
            }),
            ..Default::default()
        },
        ResourceKind::CstorVolume => ResourceSpec {
            cstor_volume: Some(VolumeTarget {
                pv_name: name.to_string(),
                options: None,
            }),
            ..Default::default()
        },
        ResourceKind::CstorPool => ResourceSpec {
            cstor_pool: Some(PoolTarget {
                pool_name: name.to_string(),
                options: None,
            }),
            ..Default::default()
        },
        ResourceKind::StoragePoolClaim => ResourceSpec {
            storage_pool_claim: Some(PoolClaimTarget {
                spc_name: name.to_string(),
                options: None,
            }),
            ..Default::default()
        },
    };
    let mut task = UpgradeTask::new(
        &kind.task_name(name),
        UpgradeTaskSpec {
            from_version: config.from_version.clone(),
            to_version: config.to_version.clone(),
            options: None,
            resource,
            image_prefix: config.image_prefix.clone(),
            image_tag: config.image_tag.clone(),
        },
    );
    task.metadata.namespace = Some(config.namespace.clone());
    task
}

/// Fetch the task of resource `name`, creating it when missing, and reset its journal
async fn get_or_create(
    tasks: &dyn ResourceGateway<UpgradeTask>,
    kind: ResourceKind,
    name: &str,
    config: &UpgradeConfig,
) -> Result<UpgradeTask, UpgradeError> {
    if name.is_empty() {
        return Err(UpgradeError::Precondition("missing name for upgradeTask".to_string()));
    }
    let task_name = kind.task_name(name);
    let namespace = config.namespace.as_str();
    let mut task = match tasks.get(&task_name, Some(namespace)).await {
        Ok(task) => {
            info!("Resuming upgrade task {}/{}", namespace, task_name);
            task
        }
        Err(e) if e.is_not_found() => {
            let created = tasks.create(&build_task(kind, name, config)).await?;
            info!("Created upgrade task {}/{}", namespace, task_name);
            created
        }
        Err(e) => return Err(e.into()),
    };

    let status = task.status.get_or_insert_with(Default::default);
    if status.start_time.is_none() {
        status.phase = Some(UpgradePhase::Started);
        status.start_time = Some(Utc::now());
    }
    status.upgrade_detailed_statuses.clear();
    Ok(tasks.update_status(&task).await?)
}

impl Journal {
    /// Journal without a backing task; writes are only logged
    pub fn detached(tasks: Arc<dyn ResourceGateway<UpgradeTask>>, fatal: bool) -> Self {
        Self {
            tasks,
            task: None,
            fatal,
        }
    }

    /// Journal backed by the upgrade task of `kind`/`name`
    pub async fn open(
        tasks: Arc<dyn ResourceGateway<UpgradeTask>>,
        kind: ResourceKind,
        name: &str,
        config: &UpgradeConfig,
    ) -> Result<Self, UpgradeError> {
        let mut journal = Self::detached(tasks, config.task_label_present);
        match get_or_create(journal.tasks.as_ref(), kind, name, config).await {
            Ok(task) => journal.task = Some(task),
            Err(e) if journal.fatal => {
                error!("Failed to get or create upgrade task for {} {}: {}", kind, name, e);
                return Err(e);
            }
            Err(e) => warn!("Continuing without upgrade task for {} {}: {}", kind, name, e),
        }
        Ok(journal)
    }

    /// Current copy of the backing task
    pub fn task(&self) -> Option<&UpgradeTask> {
        self.task.as_ref()
    }

    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    /// Validate, stamp and persist one entry
    pub async fn record(&mut self, mut entry: UpgradeDetailedStatus) -> Result<(), UpgradeError> {
        if self.task.is_none() {
            debug!("{} {:?}: {}", entry.step, entry.phase, entry.message);
            return Ok(());
        }
        if let Err(e) = validate(&entry) {
            return self.tolerate(e);
        }

        let now = Utc::now();
        entry.last_updated_time = Some(now);
        if let Some(task) = self.task.as_mut() {
            let entries = &mut task.status.get_or_insert_with(Default::default).upgrade_detailed_statuses;
            match entries.last_mut() {
                Some(tail) if entry.phase != StepPhase::Waiting => {
                    entry.start_time = tail.start_time;
                    *tail = entry;
                }
                _ => {
                    entry.start_time = Some(now);
                    entries.push(entry);
                }
            }
        }
        self.persist().await
    }

    /// Start `step`
    pub async fn waiting(&mut self, step: UpgradeStep) -> Result<(), UpgradeError> {
        info!("Starting {}", step);
        self.record(UpgradeDetailedStatus::new(step, StepPhase::Waiting)).await
    }

    /// Finish `step` successfully
    pub async fn completed(&mut self, step: UpgradeStep, message: &str) -> Result<(), UpgradeError> {
        info!("{}: {}", step, message);
        let mut entry = UpgradeDetailedStatus::new(step, StepPhase::Completed);
        entry.message = message.to_string();
        self.record(entry).await
    }

    /// Mark `step` as failing with `message`; the step may still recover
    pub async fn errored(&mut self, step: UpgradeStep, message: &str, reason: &str) -> Result<(), UpgradeError> {
        let mut entry = UpgradeDetailedStatus::new(step, StepPhase::Errored);
        entry.message = message.to_string();
        entry.reason = strip_colons(reason);
        self.record(entry).await
    }

    /// Record `err` as the failure of `step` and hand back the error to return
    ///
    /// A fatal journal write failure takes precedence over `err`.
    pub async fn fail(&mut self, step: UpgradeStep, message: &str, err: UpgradeError) -> UpgradeError {
        error!("{}: {}: {}", step, message, err);
        match self.errored(step, message, &err.reason()).await {
            Ok(()) => err,
            Err(journal_err) => journal_err,
        }
    }

    /// Pass `result` through, recording an error as the failure of `step`
    pub async fn check<T>(&mut self, step: UpgradeStep, message: &str, result: Result<T, UpgradeError>) -> Result<T, UpgradeError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(step, message, e).await),
        }
    }

    /// Count a failed attempt; the task errors out once `backoff_limit` is reached
    pub async fn record_retry(&mut self, backoff_limit: u32) -> Result<(), UpgradeError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let status = task.status.get_or_insert_with(Default::default);
        status.retries += 1;
        info!("Upgrade attempt {} of {} failed", status.retries, backoff_limit);
        if status.retries == backoff_limit {
            status.phase = Some(UpgradePhase::Error);
            status.completed_time = Some(Utc::now());
        }
        self.persist().await
    }

    /// Mark the task as successfully completed
    pub async fn mark_success(&mut self) -> Result<(), UpgradeError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let status = task.status.get_or_insert_with(Default::default);
        status.phase = Some(UpgradePhase::Success);
        status.completed_time = Some(Utc::now());
        self.persist().await
    }

    async fn persist(&mut self) -> Result<(), UpgradeError> {
        let Some(task) = self.task.as_ref() else {
            return Ok(());
        };
        match self.tasks.update_status(task).await {
            Ok(updated) => {
                self.task = Some(updated);
                Ok(())
            }
            Err(e) => self.tolerate(e.into()),
        }
    }

    fn tolerate(&self, err: UpgradeError) -> Result<(), UpgradeError> {
        if self.fatal {
            error!("Failed to update upgrade task: {}", err);
            Err(err)
        } else {
            warn!("Failed to update upgrade task, continuing: {}", err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_gateway::{MockCluster, MockFailure, Verb};

    fn config(fatal: bool) -> UpgradeConfig {
        let mut config = UpgradeConfig::new("1.3.0", "1.6.0", "openebs");
        config.task_label_present = fatal;
        config
    }

    async fn open(cluster: &MockCluster, fatal: bool) -> Journal {
        Journal::open(Arc::new(cluster.clone()), ResourceKind::JivaVolume, "pv1", &config(fatal))
            .await
            .unwrap()
    }

    fn stored(cluster: &MockCluster) -> UpgradeTask {
        cluster.object("upgrade-jiva-volume-pv1", Some("openebs")).unwrap()
    }

    #[test]
    fn test_validate() {
        assert!(validate(&UpgradeDetailedStatus::new(UpgradeStep::PreUpgrade, StepPhase::Waiting)).is_ok());
        assert!(validate(&UpgradeDetailedStatus::new(UpgradeStep::Unspecified, StepPhase::Waiting)).is_err());
        assert!(validate(&UpgradeDetailedStatus::new(UpgradeStep::Verify, StepPhase::Completed)).is_err());

        let mut errored = UpgradeDetailedStatus::new(UpgradeStep::Verify, StepPhase::Errored);
        errored.message = "failed".to_string();
        assert!(validate(&errored).is_err());
        errored.reason = "because".to_string();
        assert!(validate(&errored).is_ok());
    }

    #[tokio::test]
    async fn test_open_creates_task_and_starts_it() {
        let cluster = MockCluster::new();
        let journal = open(&cluster, true).await;

        let task = stored(&cluster);
        assert_eq!(task.spec.from_version, "1.3.0");
        assert_eq!(task.spec.resource.jiva_volume.as_ref().unwrap().pv_name, "pv1");
        let status = task.status.unwrap();
        assert_eq!(status.phase, Some(UpgradePhase::Started));
        assert!(status.start_time.is_some());
        assert!(journal.has_task());
    }

    #[tokio::test]
    async fn test_reopen_keeps_start_time_and_clears_entries() {
        let cluster = MockCluster::new();
        let mut journal = open(&cluster, true).await;
        journal.waiting(UpgradeStep::PreUpgrade).await.unwrap();
        let first_start = stored(&cluster).status.unwrap().start_time;

        let _reopened = open(&cluster, true).await;
        let status = stored(&cluster).status.unwrap();
        assert_eq!(status.start_time, first_start);
        assert!(status.upgrade_detailed_statuses.is_empty());
        assert_eq!(cluster.count(Verb::Create, "UpgradeTask"), 1);
    }

    #[tokio::test]
    async fn test_waiting_appends_and_completion_replaces_tail() {
        let cluster = MockCluster::new();
        let mut journal = open(&cluster, true).await;

        journal.waiting(UpgradeStep::PreUpgrade).await.unwrap();
        journal.completed(UpgradeStep::PreUpgrade, "done").await.unwrap();
        journal.waiting(UpgradeStep::ReplicaUpgrade).await.unwrap();
        journal
            .errored(UpgradeStep::ReplicaUpgrade, "failed", "dial tcp: refused")
            .await
            .unwrap();

        let entries = stored(&cluster).status.unwrap().upgrade_detailed_statuses;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].phase, StepPhase::Completed);
        assert_eq!(entries[0].message, "done");
        assert_eq!(entries[1].phase, StepPhase::Errored);
        assert_eq!(entries[1].reason, "dial tcp refused");
        assert!(entries[0].start_time <= entries[1].start_time);
        assert!(entries[1].last_updated_time >= entries[1].start_time);
    }

    #[tokio::test]
    async fn test_invalid_entry_is_fatal_only_with_task_label() {
        let cluster = MockCluster::new();
        let mut fatal = open(&cluster, true).await;
        let result = fatal.completed(UpgradeStep::Verify, "").await;
        assert!(matches!(result, Err(UpgradeError::InvalidJournalEntry(_))));

        let mut lenient = open(&cluster, false).await;
        assert!(lenient.completed(UpgradeStep::Verify, "").await.is_ok());
        assert!(stored(&cluster).status.unwrap().upgrade_detailed_statuses.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure() {
        let cluster = MockCluster::new();
        let mut journal = open(&cluster, true).await;
        cluster.fail_next::<UpgradeTask>(Verb::UpdateStatus, MockFailure::Transport("refused".to_string()));
        assert!(journal.waiting(UpgradeStep::PreUpgrade).await.is_err());

        let mut lenient = open(&cluster, false).await;
        cluster.fail_next::<UpgradeTask>(Verb::UpdateStatus, MockFailure::Transport("refused".to_string()));
        assert!(lenient.waiting(UpgradeStep::PreUpgrade).await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_returns_original_error() {
        let cluster = MockCluster::new();
        let mut journal = open(&cluster, true).await;
        journal.waiting(UpgradeStep::PreUpgrade).await.unwrap();

        let err = journal
            .fail(
                UpgradeStep::PreUpgrade,
                "failed to get target details",
                UpgradeError::Precondition("no deployments found for a=b in openebs".to_string()),
            )
            .await;
        assert!(matches!(err, UpgradeError::Precondition(_)));

        let entries = stored(&cluster).status.unwrap().upgrade_detailed_statuses;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "failed to get target details");
        assert_eq!(entries[0].reason, "no deployments found for a=b in openebs");
    }

    #[tokio::test]
    async fn test_retries_reach_backoff_limit() {
        let cluster = MockCluster::new();
        let mut journal = open(&cluster, true).await;

        journal.record_retry(2).await.unwrap();
        let status = stored(&cluster).status.unwrap();
        assert_eq!(status.retries, 1);
        assert_eq!(status.phase, Some(UpgradePhase::Started));

        journal.record_retry(2).await.unwrap();
        let status = stored(&cluster).status.unwrap();
        assert_eq!(status.retries, 2);
        assert_eq!(status.phase, Some(UpgradePhase::Error));
        assert!(status.completed_time.is_some());
    }

    #[tokio::test]
    async fn test_detached_journal_writes_nothing() {
        let cluster = MockCluster::new();
        let mut journal = Journal::detached(Arc::new(cluster.clone()), true);
        journal.waiting(UpgradeStep::PreUpgrade).await.unwrap();
        journal.mark_success().await.unwrap();
        assert!(cluster.calls().is_empty());
    }
}

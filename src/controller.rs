// Copyright 2025 Neutree Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Periodic reconciliation of every Kubernetes cluster's router.
//!
//! Each pass lists the cluster rows, reconciles the due ones concurrently and
//! waits for all of them before the next tick, so one cluster is never
//! reconciled twice at the same time.

use crate::context::Context;
use crate::error_policy::{Action, error_policy};
use crate::reconcile::router::RouterComponent;
use crate::reconcile::{self, Error, Settings};
use crate::storage::{self, ObjectStorage};
use crate::types::v1::cluster::Cluster;
use crate::types::v1::status::RouterStatus;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq)]
enum Backoff {
    Until(Instant),
    UntilChanged(Option<DateTime<Utc>>),
}

impl Backoff {
    fn from_action(action: Action, cluster: &Cluster, now: Instant) -> Option<Self> {
        match action {
            Action::Retry => None,
            Action::Requeue(delay) => Some(Backoff::Until(now + delay)),
            Action::AwaitChange => Some(Backoff::UntilChanged(cluster.metadata.update_timestamp)),
        }
    }

    fn is_due(&self, cluster: &Cluster, now: Instant) -> bool {
        match self {
            Backoff::Until(at) => now >= *at,
            Backoff::UntilChanged(seen) => cluster.metadata.update_timestamp != *seen,
        }
    }
}

pub struct Controller {
    storage: Arc<dyn ObjectStorage>,
    settings: Settings,
    interval: Duration,
    backoff: BTreeMap<String, Backoff>,
}

impl Controller {
    pub fn new(storage: Arc<dyn ObjectStorage>, settings: Settings, interval: Duration) -> Self {
        Self {
            storage,
            settings,
            interval,
            backoff: BTreeMap::new(),
        }
    }

    /// Runs passes until `cancel` fires. In-flight reconciles are aborted;
    /// applied objects stay and the next run reconverges them.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval = ?self.interval,
            namespace = %self.settings.namespace,
            "cluster controller started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.pass(&cancel).await;
        }
        info!("cluster controller stopped");
    }

    /// Lists clusters and reconciles the ones due. Returns how many ran.
    pub async fn pass(&mut self, cancel: &CancellationToken) -> usize {
        let clusters: Vec<Cluster> = match storage::list_typed(self.storage.as_ref(), &[]).await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(error = %e, "failed to list clusters");
                return 0;
            }
        };

        let now = Instant::now();
        let keys: Vec<String> = clusters.iter().map(|c| c.metadata.workspace_name()).collect();
        self.backoff.retain(|key, _| keys.contains(key));

        let due: Vec<&Cluster> = clusters
            .iter()
            .filter(|c| c.is_kubernetes())
            .filter(|c| {
                self.backoff
                    .get(&c.metadata.workspace_name())
                    .is_none_or(|b| b.is_due(c, now))
            })
            .collect();
        debug!(total = clusters.len(), due = due.len(), "reconcile pass");

        let storage = self.storage.as_ref();
        let settings = &self.settings;
        let results = join_all(
            due.iter()
                .map(|cluster| reconcile_cluster(storage, cluster, settings, cancel)),
        )
        .await;

        let now = Instant::now();
        for (cluster, result) in due.iter().zip(results) {
            let key = cluster.metadata.workspace_name();
            let backoff = match result {
                Ok(()) => None,
                Err(e) => Backoff::from_action(error_policy(cluster, &e), cluster, now),
            };
            match backoff {
                Some(b) => {
                    self.backoff.insert(key, b);
                }
                None => {
                    self.backoff.remove(&key);
                }
            }
        }
        due.len()
    }
}

/// Reconciles or deletes one cluster's router and writes the resulting router
/// status back when it changed.
pub async fn reconcile_cluster(
    storage: &dyn ObjectStorage,
    cluster: &Cluster,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let before = cluster.router_status();
    let deleting = cluster.metadata.is_deleting();
    if deleting && before.phase.is_terminal() {
        return Ok(());
    }

    let mut status = before.clone();
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            // Partial progress is dropped; the next run observes it again.
            return Err(Error::Cancelled { cluster: cluster.name().to_owned() });
        }
        result = run_component(storage, cluster, settings, cancel, deleting, &mut status) => result,
    };

    if let Err(e) = &result
        && status == before
    {
        status.error_message = Some(e.to_string());
    }

    if status != before {
        let key = cluster.metadata.workspace_name();
        debug!(cluster = %key, phase = %status.phase, "writing router status");
        if let Err(e) = reconcile::write_status(storage, cluster, status).await {
            warn!(cluster = %key, error = %e, "failed to write router status");
            return result.and(Err(e));
        }
    }
    result
}

async fn run_component(
    storage: &dyn ObjectStorage,
    cluster: &Cluster,
    settings: &Settings,
    cancel: &CancellationToken,
    deleting: bool,
    status: &mut RouterStatus,
) -> Result<(), Error> {
    let default_prefix = &settings.default_image_prefix;
    let prefix = match reconcile::image_prefix(storage, cluster, default_prefix).await {
        Ok(prefix) => prefix,
        // Deletion only needs object identities, not the image.
        Err(_) if deleting => default_prefix.clone(),
        Err(e) => return Err(e),
    };

    let kubeconfig = &cluster.kubernetes_config()?.kubeconfig;
    let ctx = Context::from_kubeconfig(kubeconfig).await?;
    let component = RouterComponent::new(cluster, ctx, &settings.namespace, &prefix);

    if deleting {
        reconcile::delete_router(&component, status, cancel).await
    } else {
        reconcile::reconcile_router(&component, status, settings, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::{AnyObject, Kind, ObjectList};
    use crate::storage::Filter;
    use crate::tests::MemoryStorage;
    use async_trait::async_trait;
    use crate::types::v1::status::state::RouterPhase;

    #[tokio::test]
    async fn test_bad_kubeconfig_is_reported() {
        let mut cluster = crate::tests::create_test_cluster(None);
        cluster.spec.image_registry = String::new();
        if let Some(k8s) = cluster.spec.config.kubernetes_config.as_mut() {
            k8s.kubeconfig = "%%% not base64".to_string();
        }
        let storage = MemoryStorage::default().with(AnyObject::Cluster(cluster.clone()));

        let cancel = CancellationToken::new();
        let err = reconcile_cluster(&storage, &cluster, &Settings::default(), &cancel)
            .await
            .expect_err("kubeconfig cannot decode");
        assert!(!err.is_retryable());

        let Some(AnyObject::Cluster(stored)) = storage.object(Kind::Cluster, "default/test-cluster")
        else {
            panic!("cluster row missing");
        };
        let router = stored.router_status();
        assert_eq!(router.phase, RouterPhase::Pending);
        assert!(router.error_message.is_some_and(|m| m.contains("base64")));
    }

    #[tokio::test]
    async fn test_deleted_router_is_skipped() {
        let mut cluster = crate::tests::create_test_cluster(None);
        cluster.metadata.deletion_timestamp = Some(Utc::now());
        cluster.status = Some(crate::types::v1::cluster::ClusterStatus {
            router: Some(RouterStatus {
                phase: RouterPhase::Gone,
                ..Default::default()
            }),
            ..Default::default()
        });
        let storage = MemoryStorage::default();

        reconcile_cluster(&storage, &cluster, &Settings::default(), &CancellationToken::new())
            .await
            .expect("nothing to do");
    }

    #[tokio::test]
    async fn test_pass_applies_backoff() {
        let mut cluster = crate::tests::create_test_cluster(None);
        // Registry row is absent, so the pass waits for the cluster to change.
        cluster.metadata.update_timestamp = Some(Utc::now());
        let mut ssh_cluster = crate::tests::create_test_cluster(None);
        ssh_cluster.metadata.name = "ssh".to_string();
        ssh_cluster.spec.type_ = crate::types::v1::cluster::ClusterType::Ssh;

        let storage = Arc::new(
            MemoryStorage::default()
                .with(AnyObject::Cluster(cluster.clone()))
                .with(AnyObject::Cluster(ssh_cluster)),
        );
        let mut controller =
            Controller::new(storage.clone(), Settings::default(), DEFAULT_RECONCILE_INTERVAL);
        let cancel = CancellationToken::new();

        assert_eq!(controller.pass(&cancel).await, 1);
        assert_eq!(controller.pass(&cancel).await, 0, "unchanged cluster is not retried");

        cluster.metadata.update_timestamp = Some(Utc::now() + chrono::Duration::seconds(1));
        storage
            .update(&AnyObject::Cluster(cluster))
            .await
            .expect("update cluster");
        assert_eq!(controller.pass(&cancel).await, 1);
    }

    /// Storage whose every call hangs, like a gateway that stopped answering.
    struct StalledStorage;

    #[async_trait]
    impl ObjectStorage for StalledStorage {
        async fn list(
            &self,
            _kind: Kind,
            _filters: &[Filter],
        ) -> Result<ObjectList, storage::Error> {
            std::future::pending().await
        }

        async fn create(&self, _object: &AnyObject) -> Result<AnyObject, storage::Error> {
            std::future::pending().await
        }

        async fn update(&self, _object: &AnyObject) -> Result<AnyObject, storage::Error> {
            std::future::pending().await
        }

        async fn delete(
            &self,
            _kind: Kind,
            _name: &str,
            _workspace: &str,
        ) -> Result<(), storage::Error> {
            std::future::pending().await
        }

        async fn update_status(
            &self,
            _kind: Kind,
            _name: &str,
            _workspace: &str,
            _status: serde_json::Value,
        ) -> Result<(), storage::Error> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_aborts_stalled_lookup() {
        let cluster = crate::tests::create_test_cluster(None);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            reconcile_cluster(&StalledStorage, &cluster, &Settings::default(), &cancel),
        )
        .await
        .expect("cancellation returns promptly")
        .expect_err("cancelled");
        assert!(matches!(err, Error::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_pass_skips_undecodable_rows() {
        let good = crate::tests::create_test_cluster(None);
        let storage = Arc::new(MemoryStorage::default().with(AnyObject::Cluster(good)));
        let mut controller =
            Controller::new(storage, Settings::default(), DEFAULT_RECONCILE_INTERVAL);

        // Rows the gateway returns that this build does not fully understand.
        let rows = vec![
            serde_json::json!({"metadata": {"name": "busy", "workspace": "default"},
                "spec": {"type": "kubernetes"}, "status": {"phase": "Updating"}}),
            serde_json::json!({"metadata": {"name": "odd", "workspace": "default"},
                "spec": {"type": "mainframe"}}),
        ];
        let list = ObjectList::from_values(Kind::Cluster, rows);
        assert_eq!(list.len(), 1);
        for object in list.items {
            controller.storage.create(&object).await.expect("insert");
        }

        assert_eq!(controller.pass(&CancellationToken::new()).await, 2);
    }

    #[test]
    fn test_backoff_until() {
        let cluster = crate::tests::create_test_cluster(None);
        let now = Instant::now();
        let backoff = Backoff::from_action(Action::Requeue(Duration::from_secs(60)), &cluster, now)
            .expect("requeue backs off");
        assert!(!backoff.is_due(&cluster, now));
        assert!(backoff.is_due(&cluster, now + Duration::from_secs(61)));
        assert!(Backoff::from_action(Action::Retry, &cluster, now).is_none());
    }
}

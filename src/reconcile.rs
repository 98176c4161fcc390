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

pub mod router;

use crate::scheme::Kind;
use crate::storage::{self, ObjectStorage};
use crate::types::v1::cluster::Cluster;
use crate::types::v1::registry::ImageRegistry;
use crate::types::v1::status::RouterStatus;
use crate::types::v1::status::state::RouterEvent;
use crate::{context, types};
use chrono::Utc;
use router::RouterComponent;
use snafu::Snafu;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_NAMESPACE: &str = "neutree";
pub const DEFAULT_IMAGE_PREFIX: &str = "docker.io";
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(transparent)]
    Router { source: router::Error },

    #[snafu(transparent)]
    Storage { source: storage::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },

    #[snafu(display("reconcile of cluster '{}' was cancelled", cluster))]
    Cancelled { cluster: String },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Context { source } => source.is_not_found(),
            Error::Storage { source } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Router { source } => source.is_retryable(),
            Error::Storage { source } => source.is_retryable(),
            Error::Context { source } => matches!(source, context::Error::Kube { .. }),
            Error::Cancelled { .. } => true,
            Error::Types { .. } => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Namespace the router is installed into on every managed cluster.
    pub namespace: String,
    /// Used when the cluster names no image registry.
    pub default_image_prefix: String,
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_owned(),
            default_image_prefix: DEFAULT_IMAGE_PREFIX.to_owned(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            poll_interval: READINESS_POLL_INTERVAL,
        }
    }
}

/// Prefix of the cluster's image registry, which lives in the cluster's
/// workspace.
pub async fn image_prefix(
    storage: &dyn ObjectStorage,
    cluster: &Cluster,
    default: &str,
) -> Result<String, Error> {
    let name = cluster.spec.image_registry.trim();
    if name.is_empty() {
        return Ok(default.to_owned());
    }

    let registry: ImageRegistry = storage::get_typed(storage, name, cluster.workspace()).await?;
    Ok(registry.image_prefix()?)
}

/// Feeds one observation into the router state machine.
pub fn observe(status: &mut RouterStatus, event: RouterEvent) {
    let phase = status.phase.next(event);
    status.transition(phase, Utc::now());
}

fn event_for(error: &router::Error) -> RouterEvent {
    if error.is_apply_failed() {
        RouterEvent::ApplyFailed
    } else if error.is_timeout() {
        RouterEvent::TimedOut
    } else {
        RouterEvent::NotReady
    }
}

/// One pass over one cluster's router: render, apply, wait for readiness.
/// `status` is advanced for every outcome except cancellation.
pub async fn reconcile_router(
    component: &RouterComponent,
    status: &mut RouterStatus,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let cluster = component.variables().cluster.clone();

    let applied = tokio::select! {
        _ = cancel.cancelled() => {
            return CancelledSnafu { cluster: cluster.clone() }.fail();
        }
        applied = component.reconcile() => applied,
    };
    let changed = match applied {
        Ok(changed) => changed,
        Err(e) => {
            observe(status, event_for(&e));
            status.error_message = Some(e.to_string());
            return Err(e.into());
        }
    };
    observe(status, RouterEvent::Applied { changed });

    let ready = tokio::select! {
        _ = cancel.cancelled() => {
            return CancelledSnafu { cluster: cluster.clone() }.fail();
        }
        ready = component.wait_ready(settings.readiness_timeout, settings.poll_interval) => ready,
    };

    match ready {
        Ok(endpoint) => {
            if status.endpoint.as_deref() != Some(endpoint.as_str()) {
                info!(cluster = %cluster, endpoint = %endpoint, "router endpoint ready");
            }
            observe(status, RouterEvent::Converged);
            status.endpoint = Some(endpoint);
            status.error_message = None;
            Ok(())
        }
        Err(e) => {
            observe(status, event_for(&e));
            status.error_message = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// Removes the router. Moves to `Gone` once nothing owned is left.
pub async fn delete_router(
    component: &RouterComponent,
    status: &mut RouterStatus,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    observe(status, RouterEvent::DeleteRequested);
    status.endpoint = None;

    let deleted = tokio::select! {
        _ = cancel.cancelled() => {
            return CancelledSnafu { cluster: component.variables().cluster.clone() }.fail();
        }
        deleted = component.delete() => deleted,
    };
    match deleted {
        Ok(true) => {
            observe(status, RouterEvent::Deleted);
            status.error_message = None;
            Ok(())
        }
        Ok(false) => {
            debug!(cluster = %component.variables().cluster, "router objects still terminating");
            Ok(())
        }
        Err(e) => {
            warn!(cluster = %component.variables().cluster, error = %e, "router delete failed");
            status.error_message = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// The status a cluster row should carry after `router` was observed.
pub fn cluster_status(cluster: &Cluster, router: RouterStatus) -> Result<serde_json::Value, Error> {
    let mut status = cluster.status.clone().unwrap_or_default();
    status.router = Some(router);
    Ok(serde_json::to_value(status).map_err(types::error::Error::from)?)
}

pub async fn write_status(
    storage: &dyn ObjectStorage,
    cluster: &Cluster,
    router: RouterStatus,
) -> Result<(), Error> {
    let status = cluster_status(cluster, router)?;
    storage
        .update_status(Kind::Cluster, cluster.name(), cluster.workspace(), status)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::AnyObject;
    use crate::tests::{FakeApiServer, MemoryStorage};
    use crate::types::v1::metadata::Metadata;
    use crate::types::v1::registry::ImageRegistrySpec;
    use crate::types::v1::status::state::RouterPhase;

    fn registry() -> AnyObject {
        AnyObject::ImageRegistry(ImageRegistry {
            metadata: Metadata::new("test-registry", "default"),
            spec: ImageRegistrySpec {
                url: "https://registry.example.com".to_string(),
                repository: "mirror".to_string(),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_image_prefix_from_registry() {
        let storage = MemoryStorage::default().with(registry());
        let cluster = crate::tests::create_test_cluster(None);

        let prefix = image_prefix(&storage, &cluster, DEFAULT_IMAGE_PREFIX)
            .await
            .expect("registry resolves");
        assert_eq!(prefix, "registry.example.com/mirror");
    }

    #[tokio::test]
    async fn test_image_prefix_defaults_and_missing() {
        let storage = MemoryStorage::default();
        let mut cluster = crate::tests::create_test_cluster(None);

        let err = image_prefix(&storage, &cluster, DEFAULT_IMAGE_PREFIX)
            .await
            .expect_err("registry missing");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());

        cluster.spec.image_registry = String::new();
        let prefix = image_prefix(&storage, &cluster, DEFAULT_IMAGE_PREFIX)
            .await
            .expect("default prefix");
        assert_eq!(prefix, "docker.io");
    }

    #[test]
    fn test_observe_stamps_transitions() {
        let mut status = RouterStatus::default();
        observe(&mut status, RouterEvent::Applied { changed: 5 });
        assert_eq!(status.phase, RouterPhase::Applying);
        let applied_at = status.last_transition_time;
        assert!(applied_at.is_some());

        observe(&mut status, RouterEvent::NotReady);
        assert_eq!(status.phase, RouterPhase::Applying);
        assert_eq!(status.last_transition_time, applied_at);

        observe(&mut status, RouterEvent::Converged);
        assert_eq!(status.phase, RouterPhase::Ready);
    }

    #[test]
    fn test_event_for_errors() {
        let timeout = router::Error::ReadinessTimeout {
            timeout: Duration::from_secs(1),
            report: Default::default(),
        };
        assert_eq!(event_for(&timeout), RouterEvent::TimedOut);

        let missing = router::Error::NotFound {
            kind: "Service".to_string(),
            name: "router".to_string(),
        };
        assert_eq!(event_for(&missing), RouterEvent::NotReady);
    }

    #[tokio::test]
    async fn test_write_status_keeps_other_fields() {
        let mut cluster = crate::tests::create_test_cluster(None);
        cluster.status = Some(
            serde_json::from_value(serde_json::json!({
                "phase": "Updating",
                "accelerator_type": "nvidia_gpu",
                "dashboard_url": "http://10.0.0.1:8265",
                "ray_version": "2.43"
            }))
            .expect("status"),
        );
        let storage = MemoryStorage::default().with(AnyObject::Cluster(cluster.clone()));

        let router = RouterStatus {
            phase: RouterPhase::Ready,
            endpoint: Some("http://192.0.2.1:8000".to_string()),
            ..Default::default()
        };
        write_status(&storage, &cluster, router).await.expect("write");

        let stored = storage
            .object(Kind::Cluster, "default/test-cluster")
            .expect("cluster row")
            .to_value()
            .expect("encode");
        let status = &stored["status"];
        assert_eq!(status["phase"], "Updating");
        assert_eq!(status["accelerator_type"], "nvidia_gpu");
        assert_eq!(status["dashboard_url"], "http://10.0.0.1:8265");
        assert_eq!(status["ray_version"], "2.43");
        assert_eq!(status["router"]["phase"], "Ready");
        assert_eq!(status["router"]["endpoint"], "http://192.0.2.1:8000");
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_apply() {
        let api = FakeApiServer::default().with_apply_delay(Duration::from_secs(30));
        let cluster = crate::tests::create_test_cluster(None);
        let component =
            RouterComponent::new(&cluster, api.context(), DEFAULT_NAMESPACE, DEFAULT_IMAGE_PREFIX);
        let cancel = cancel_after(Duration::from_millis(50));

        let mut status = RouterStatus::default();
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            reconcile_router(&component, &mut status, &Settings::default(), &cancel),
        )
        .await
        .expect("cancellation returns promptly")
        .expect_err("cancelled");

        assert!(matches!(err, Error::Cancelled { ref cluster } if cluster == "test-cluster"));
        assert!(err.is_retryable());
        assert_eq!(status.phase, RouterPhase::Pending);
    }

    #[tokio::test]
    async fn test_delete_router_until_gone() {
        let api = FakeApiServer::default();
        let cluster = crate::tests::create_test_cluster(None);
        let component =
            RouterComponent::new(&cluster, api.context(), DEFAULT_NAMESPACE, DEFAULT_IMAGE_PREFIX);
        component.reconcile().await.expect("apply");

        let cancel = CancellationToken::new();
        let mut status = RouterStatus {
            phase: RouterPhase::Ready,
            endpoint: Some("http://192.0.2.1:8000".to_string()),
            ..Default::default()
        };
        delete_router(&component, &mut status, &cancel).await.expect("delete");
        assert_eq!(status.phase, RouterPhase::Deleting);
        assert!(status.endpoint.is_none());

        delete_router(&component, &mut status, &cancel).await.expect("delete again");
        assert_eq!(status.phase, RouterPhase::Gone);
    }
}

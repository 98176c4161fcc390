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

use crate::reconcile::Error;
use crate::types::v1::cluster::Cluster;
use std::time::Duration;
use tracing::error;

/// Delay before a cluster whose reconcile failed non-transiently is retried.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Try again on the next pass.
    Retry,
    /// Skip the cluster until the given delay has passed.
    Requeue(Duration),
    /// Skip the cluster until its stored object changes.
    AwaitChange,
}

pub fn error_policy(cluster: &Cluster, error: &Error) -> Action {
    error!(cluster = %cluster.metadata.workspace_name(), error = %error, "reconcile failed");

    if error.is_not_found() {
        Action::AwaitChange
    } else if error.is_retryable() {
        Action::Retry
    } else {
        Action::Requeue(FAILURE_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::router;
    use crate::storage;
    use crate::scheme::Kind;

    #[test]
    fn test_error_policy() {
        let cluster = crate::tests::create_test_cluster(None);

        let missing_registry = Error::Storage {
            source: storage::Error::NotFound {
                kind: Kind::ImageRegistry,
                name: "test-registry".to_string(),
            },
        };
        assert_eq!(error_policy(&cluster, &missing_registry), Action::AwaitChange);

        let not_ready = Error::Router {
            source: router::Error::ReadinessTimeout {
                timeout: Duration::from_secs(60),
                report: Default::default(),
            },
        };
        assert_eq!(error_policy(&cluster, &not_ready), Action::Retry);

        let bad_access = Error::Router {
            source: router::Error::UnsupportedServiceType {
                service_type: "ClusterIP".to_string(),
            },
        };
        assert_eq!(error_policy(&cluster, &bad_access), Action::Requeue(FAILURE_BACKOFF));
    }
}

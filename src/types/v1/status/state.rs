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

use serde::{Deserialize, Serialize};
use strum::Display;

/// Lifecycle of the router installed in a Kubernetes cluster.
///
/// `Pending -> Applying -> (Ready <-> Degraded) -> Deleting -> Gone`
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum RouterPhase {
    #[default]
    #[strum(serialize = "Pending")]
    Pending,

    #[strum(serialize = "Applying")]
    Applying,

    #[strum(serialize = "Ready")]
    Ready,

    #[strum(serialize = "Degraded")]
    Degraded,

    #[strum(serialize = "Deleting")]
    Deleting,

    #[strum(serialize = "Gone")]
    Gone,
}

/// What one reconcile pass observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouterEvent {
    /// Server-side apply succeeded; `changed` objects differed from the cluster.
    Applied { changed: usize },

    ApplyFailed,

    /// Deployment and Service are both ready.
    Converged,

    /// Objects are applied but readiness checks did not pass.
    NotReady,

    /// Readiness did not converge within the deadline.
    TimedOut,

    DeleteRequested,

    /// No labelled objects remain.
    Deleted,
}

impl RouterPhase {
    /// Level-triggered transition. Every pass feeds what it saw; an apply
    /// that had to change objects re-enters `Applying`.
    pub fn next(self, event: RouterEvent) -> RouterPhase {
        use RouterEvent::*;
        use RouterPhase::*;

        match (self, event) {
            (Gone, _) => Gone,
            (Deleting, Deleted) => Gone,
            (Deleting, _) => Deleting,
            (_, DeleteRequested) => Deleting,
            (_, Deleted) => Gone,

            (Pending, Applied { .. }) => Applying,
            (_, Applied { changed }) if changed > 0 => Applying,
            (phase, Applied { .. }) => phase,

            (_, ApplyFailed) | (_, TimedOut) => Degraded,
            (_, Converged) => Ready,

            (Pending, NotReady) | (Applying, NotReady) => Applying,
            (Ready, NotReady) | (Degraded, NotReady) => Degraded,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RouterPhase::Gone)
    }
}

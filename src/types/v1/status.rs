pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Router status written back onto the owning cluster.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RouterStatus {
    #[serde(default)]
    pub phase: state::RouterPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl RouterStatus {
    /// Moves to `phase`, stamping the transition time only when it changes.
    pub fn transition(&mut self, phase: state::RouterPhase, now: DateTime<Utc>) {
        if self.phase != phase || self.last_transition_time.is_none() {
            self.last_transition_time = Some(now);
        }
        self.phase = phase;
    }
}

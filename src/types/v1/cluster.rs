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

use super::object::Object;
use super::resource::ClusterResources;
use super::status::RouterStatus;
use crate::types;
use crate::types::error::NoKubernetesConfigSnafu;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::OptionExt;
use std::collections::BTreeMap;
use strum::{Display, EnumString};

pub type Cluster = Object<ClusterSpec, ClusterStatus>;

pub const DEFAULT_ROUTER_REPLICAS: u32 = 2;
pub const DEFAULT_ROUTER_CPU: &str = "500m";
pub const DEFAULT_ROUTER_MEMORY: &str = "512Mi";

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ClusterType {
    #[default]
    Ssh,
    Kubernetes,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterSpec {
    #[serde(rename = "type", default)]
    pub type_: ClusterType,

    #[serde(default)]
    pub version: String,

    /// Name of the image registry (same workspace) images are pulled from.
    #[serde(default)]
    pub image_registry: String,

    #[serde(default)]
    pub config: ClusterConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_config: Option<SshClusterConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_config: Option<KubernetesClusterConfig>,
}

/// Credentials for reaching a node over SSH.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SshAuth {
    pub ssh_user: String,

    /// Base64-encoded private key.
    #[serde(alias = "ssh_private_key_base64")]
    pub ssh_private_key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SshClusterConfig {
    pub head_ip: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_ips: Vec<String>,

    pub auth: SshAuth,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct KubernetesClusterConfig {
    /// Base64-encoded kubeconfig.
    pub kubeconfig: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterSpec>,
}

/// How the router Service is exposed.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
pub enum AccessMode {
    #[default]
    LoadBalancer,
    NodePort,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RouterSpec {
    /// Overrides the cluster version for the router image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_mode: Option<AccessMode>,
}

impl RouterSpec {
    pub fn replicas(&self) -> u32 {
        self.replicas.unwrap_or(DEFAULT_ROUTER_REPLICAS)
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode.unwrap_or_default()
    }

    pub fn resources(&self) -> BTreeMap<String, String> {
        if self.resources.is_empty() {
            [
                ("cpu".to_owned(), DEFAULT_ROUTER_CPU.to_owned()),
                ("memory".to_owned(), DEFAULT_ROUTER_MEMORY.to_owned()),
            ]
            .into_iter()
            .collect()
        } else {
            self.resources.clone()
        }
    }
}

/// Phases written by the cluster lifecycle controllers. Phases this crate
/// does not know are carried through verbatim.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, Display)]
pub enum ClusterPhase {
    #[default]
    Pending,
    Initializing,
    Running,
    Failed,
    Deleted,
    #[serde(untagged)]
    #[strum(to_string = "{0}")]
    Other(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ClusterPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ClusterResources>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Fields owned by other controllers, written back untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Cluster {
    pub fn is_kubernetes(&self) -> bool {
        self.spec.type_ == ClusterType::Kubernetes
    }

    pub fn kubernetes_config(&self) -> Result<&KubernetesClusterConfig, types::error::Error> {
        self.spec
            .config
            .kubernetes_config
            .as_ref()
            .context(NoKubernetesConfigSnafu {
                name: self.metadata.name.clone(),
            })
    }

    /// Router settings with defaults applied; the version falls back to the
    /// cluster version.
    pub fn router_spec(&self) -> RouterSpec {
        let mut spec = self
            .spec
            .config
            .kubernetes_config
            .as_ref()
            .and_then(|c| c.router.clone())
            .unwrap_or_default();

        if spec.version.as_deref().is_none_or(str::is_empty) {
            spec.version = Some(self.spec.version.clone());
        }
        spec
    }

    pub fn router_status(&self) -> RouterStatus {
        self.status
            .as_ref()
            .and_then(|s| s.router.clone())
            .unwrap_or_default()
    }
}

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

//! Wire types of the external plugin HTTP API and the registration API.

use super::PluginType;
use crate::types::v1::accelerator::Accelerator;
use crate::types::v1::cluster::SshAuth;
use crate::types::v1::engine::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PING_PATH: &str = "/v1/ping";
pub const NODE_ACCELERATOR_PATH: &str = "/v1/node/accelerator";
pub const NODE_RUNTIME_CONFIG_PATH: &str = "/v1/node/runtime-config";
pub const SUPPORT_ENGINES_PATH: &str = "/v1/support-engines";
pub const CONVERT_TO_RAY_PATH: &str = "/v1/resource/convert-to-ray";
pub const CONVERT_TO_KUBERNETES_PATH: &str = "/v1/resource/convert-to-kubernetes";
pub const PARSE_FROM_RAY_PATH: &str = "/v1/resource/parse-from-ray";
pub const PARSE_FROM_KUBERNETES_PATH: &str = "/v1/resource/parse-from-kubernetes";

pub const REGISTER_PATH: &str = "/v1/plugin/register";
pub const LIST_PLUGINS_PATH: &str = "/v1/plugins";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct NodeRequest {
    pub node_ip: String,
    pub ssh_auth: SshAuth,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AcceleratorsResponse {
    #[serde(default)]
    pub accelerators: Vec<Accelerator>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct SupportEnginesResponse {
    #[serde(default)]
    pub engines: Vec<Engine>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ParseFromRayRequest {
    pub resources: BTreeMap<String, f64>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ParseFromKubernetesRequest {
    pub resources: BTreeMap<String, String>,
    pub node_labels: BTreeMap<String, String>,
}

/// Body of `POST /v1/plugin/register`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct RegisterRequest {
    pub resource_name: String,
    pub endpoint: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PluginInfo {
    pub resource_name: String,
    #[serde(rename = "type")]
    pub type_: PluginType,
    pub version: String,
}

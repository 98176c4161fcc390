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
use super::resource::ResourceSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Endpoint = Object<EndpointSpec, EndpointStatus>;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EndpointSpec {
    pub cluster: String,

    pub model: ModelSpec,

    pub engine: EndpointEngineSpec,

    #[serde(default)]
    pub resources: ResourceSpec,

    #[serde(default)]
    pub replicas: ReplicaSpec,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployment_options: BTreeMap<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ModelSpec {
    pub registry: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default)]
    pub task: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EndpointEngineSpec {
    pub engine: String,
    pub version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ReplicaSpec {
    #[serde(default = "default_replicas")]
    pub num: i32,
}

fn default_replicas() -> i32 {
    1
}

impl Default for ReplicaSpec {
    fn default() -> Self {
        Self {
            num: default_replicas(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EndpointStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

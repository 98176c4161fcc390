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

use super::object::{CommonStatus, Object};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Engine = Object<EngineSpec, CommonStatus>;

pub const TASK_TEXT_GENERATION: &str = "text-generation";
pub const TASK_TEXT_EMBEDDING: &str = "text-embedding";
pub const TASK_TEXT_RERANK: &str = "text-rerank";

pub const SUBSTRATE_KUBERNETES: &str = "kubernetes";
pub const DEPLOY_MODE_DEFAULT: &str = "default";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EngineSpec {
    #[serde(default)]
    pub versions: Vec<EngineVersion>,

    /// Union of the tasks of every version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_tasks: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EngineVersion {
    pub version: String,

    /// JSON schema for user-supplied values.
    #[serde(default)]
    pub values_schema: serde_json::Value,

    /// Accelerator family -> container image.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, ImageSpec>,

    /// Substrate -> deploy mode -> template.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deploy_template: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_tasks: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageSpec {
    pub image_name: String,
    pub tag: String,
}

impl ImageSpec {
    pub fn new(image_name: &str, tag: &str) -> Self {
        Self {
            image_name: image_name.to_owned(),
            tag: tag.to_owned(),
        }
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.image_name, self.tag)
    }
}

impl EngineVersion {
    pub fn image_for(&self, accelerator_type: &str) -> Option<&ImageSpec> {
        self.images.get(accelerator_type)
    }

    pub fn template(&self, substrate: &str, mode: &str) -> Option<&str> {
        self.deploy_template
            .get(substrate)
            .and_then(|modes| modes.get(mode))
            .map(String::as_str)
    }
}

impl Engine {
    pub fn version(&self, version: &str) -> Option<&EngineVersion> {
        self.spec.versions.iter().find(|v| v.version == version)
    }
}

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
use crate::types;
use crate::types::error::InvalidRegistryUrlSnafu;
use serde::{Deserialize, Serialize};

pub type ModelRegistry = Object<ModelRegistrySpec, CommonStatus>;
pub type ImageRegistry = Object<ImageRegistrySpec, CommonStatus>;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ModelRegistryType {
    #[default]
    #[serde(rename = "hugging-face")]
    HuggingFace,

    #[serde(rename = "bentoml")]
    BentoMl,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ModelRegistrySpec {
    #[serde(rename = "type", default)]
    pub type_: ModelRegistryType,

    pub url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credentials: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageRegistryAuth {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ImageRegistrySpec {
    pub url: String,

    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub authconfig: ImageRegistryAuth,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,
}

impl ImageRegistry {
    /// `host[:port][/repository]`, the prefix images are pulled by.
    pub fn image_prefix(&self) -> Result<String, types::error::Error> {
        let url = self.spec.url.trim();
        let host = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url)
            .trim_end_matches('/');

        if host.is_empty() || host.contains(' ') {
            return InvalidRegistryUrlSnafu { url }.fail();
        }

        let repository = self.spec.repository.trim_matches('/');
        if repository.is_empty() {
            Ok(host.to_owned())
        } else {
            Ok(format!("{host}/{repository}"))
        }
    }
}

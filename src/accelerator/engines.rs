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

//! Built-in engine catalog shared by the internal plugins.

use crate::plugin::{CatalogSnafu, Error};
use crate::types::v1::API_VERSION;
use crate::types::v1::engine::{
    DEPLOY_MODE_DEFAULT, Engine, EngineSpec, EngineVersion, ImageSpec, SUBSTRATE_KUBERNETES,
    TASK_TEXT_EMBEDDING, TASK_TEXT_GENERATION, TASK_TEXT_RERANK,
};
use crate::types::v1::metadata::Metadata;
use crate::types::v1::resource::{AMD_GPU, INTEL_XPU, NVIDIA_GPU};
use snafu::ResultExt;
use std::collections::BTreeMap;

const ENGINE_KIND: &str = "Engine";
const CATALOG_WORKSPACE: &str = "default";
const IMAGE_REPOSITORY: &str = "neutree";

const KUBERNETES_TEMPLATE: &str = include_str!("templates/engine-kubernetes.yaml");

struct CatalogEntry {
    name: &'static str,
    version: &'static str,
    values_schema: &'static str,
    tasks: &'static [&'static str],
    families: &'static [&'static str],
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "vllm",
        version: "v0.8.5",
        values_schema: include_str!("schemas/vllm_v0.8.5.json"),
        tasks: &[TASK_TEXT_GENERATION, TASK_TEXT_EMBEDDING, TASK_TEXT_RERANK],
        families: &[NVIDIA_GPU, AMD_GPU, INTEL_XPU],
    },
    CatalogEntry {
        name: "llama-cpp",
        version: "v0.3.7",
        values_schema: include_str!("schemas/llama-cpp_v0.3.7.json"),
        tasks: &[TASK_TEXT_GENERATION, TASK_TEXT_EMBEDDING],
        families: &[NVIDIA_GPU],
    },
];

/// Image tag suffix a family's engine images are published with.
pub(crate) fn image_suffix(family: &str) -> &'static str {
    match family {
        AMD_GPU => "rocm",
        INTEL_XPU => "xpu",
        _ => "",
    }
}

fn image_for(entry: &CatalogEntry, family: &str) -> ImageSpec {
    let image_name = format!("{IMAGE_REPOSITORY}/engine-{}", entry.name);
    match image_suffix(family) {
        "" => ImageSpec::new(&image_name, entry.version),
        suffix => ImageSpec::new(&image_name, &format!("{}-{suffix}", entry.version)),
    }
}

/// Every engine of the catalog that runs on `family`, with that family's image.
pub fn catalog(family: &str) -> Result<Vec<Engine>, Error> {
    CATALOG
        .iter()
        .filter(|entry| entry.families.contains(&family))
        .map(|entry| {
            let values_schema = serde_json::from_str(entry.values_schema).context(CatalogSnafu)?;
            let tasks: Vec<String> = entry.tasks.iter().map(|t| (*t).to_owned()).collect();

            let version = EngineVersion {
                version: entry.version.to_owned(),
                values_schema,
                images: BTreeMap::from([(family.to_owned(), image_for(entry, family))]),
                deploy_template: BTreeMap::from([(
                    SUBSTRATE_KUBERNETES.to_owned(),
                    BTreeMap::from([(DEPLOY_MODE_DEFAULT.to_owned(), KUBERNETES_TEMPLATE.to_owned())]),
                )]),
                supported_tasks: tasks.clone(),
            };

            Ok(Engine {
                id: None,
                api_version: API_VERSION.to_owned(),
                kind: ENGINE_KIND.to_owned(),
                metadata: Metadata::new(entry.name, CATALOG_WORKSPACE),
                spec: EngineSpec {
                    versions: vec![version],
                    supported_tasks: tasks,
                },
                status: None,
            })
        })
        .collect()
}

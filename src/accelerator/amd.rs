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

use super::{CPU_IMAGE_SUFFIX, PLUGIN_VERSION, engines};
use crate::converter::{
    DeviceConverter, DeviceParser, DeviceProfile, ResourceConverter, ResourceParser,
};
use crate::plugin::{Error, Plugin, PluginType, run_discovery};
use crate::types::v1::accelerator::{Accelerator, RuntimeConfig};
use crate::types::v1::cluster::SshAuth;
use crate::types::v1::engine::Engine;
use crate::types::v1::resource::AMD_GPU;
use crate::utils::ssh::CommandRunner;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub static PROFILE: DeviceProfile = DeviceProfile {
    family: AMD_GPU,
    kubernetes_resource: "amd.com/gpu",
    product_label: "amd.com/gpu.product-name",
    ray_product_prefixes: &["AMD", "amd"],
};

pub static CONVERTER: DeviceConverter = DeviceConverter::new(&PROFILE);
pub static PARSER: DeviceParser = DeviceParser::new(&PROFILE);

const DISCOVERY_COMMAND: &str = "lspci -nn";
const VENDOR: &str = "Advanced Micro Devices";
const DEVICE_CLASSES: &[&str] = &["Processing accelerators", "VGA compatible controller"];
const VISIBLE_DEVICES_ENV: &str = "HIP_VISIBLE_DEVICES";
const LAUNCH_OPTIONS: &[&str] = &[
    "--device=/dev/kfd",
    "--device=/dev/dri",
    "--group-add=video",
    "--security-opt=seccomp=unconfined",
];

pub struct AmdPlugin {
    runner: Arc<dyn CommandRunner>,
}

impl AmdPlugin {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Keeps AMD accelerator and display controller lines. The PCI slot is the
/// id; lspci does not give a product we can rely on, so the type stays empty.
fn parse_lspci_output(output: &str) -> Vec<Accelerator> {
    output
        .lines()
        .filter(|line| line.contains(VENDOR))
        .filter(|line| DEVICE_CLASSES.iter().any(|class| line.contains(class)))
        .filter_map(|line| line.split_whitespace().next())
        .map(|slot| Accelerator {
            id: slot.to_owned(),
            type_: String::new(),
        })
        .collect()
}

#[async_trait]
impl Plugin for AmdPlugin {
    fn resource_name(&self) -> &str {
        AMD_GPU
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Internal
    }

    fn version(&self) -> &str {
        PLUGIN_VERSION
    }

    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn get_node_accelerator(
        &self,
        node_ip: &str,
        auth: &SshAuth,
    ) -> Result<Vec<Accelerator>, Error> {
        let Some(output) =
            run_discovery(self.runner.as_ref(), node_ip, auth, DISCOVERY_COMMAND).await?
        else {
            return Ok(Vec::new());
        };

        let accelerators = parse_lspci_output(&output);
        debug!(node_ip = %node_ip, count = accelerators.len(), "discovered amd gpus");
        Ok(accelerators)
    }

    async fn get_node_runtime_config(
        &self,
        node_ip: &str,
        auth: &SshAuth,
    ) -> Result<RuntimeConfig, Error> {
        let accelerators = self.get_node_accelerator(node_ip, auth).await?;
        if accelerators.is_empty() {
            return Ok(RuntimeConfig::with_image_suffix(CPU_IMAGE_SUFFIX));
        }

        // HIP numbers devices in discovery order.
        let indices: Vec<String> = (0..accelerators.len()).map(|i| i.to_string()).collect();
        let mut config = RuntimeConfig::with_image_suffix(engines::image_suffix(AMD_GPU));
        config
            .env
            .insert(VISIBLE_DEVICES_ENV.to_owned(), indices.join(","));
        config.options = LAUNCH_OPTIONS.iter().map(|o| (*o).to_owned()).collect();
        Ok(config)
    }

    async fn get_support_engines(&self) -> Result<Vec<Engine>, Error> {
        engines::catalog(AMD_GPU)
    }

    fn resource_converter(&self) -> Arc<dyn ResourceConverter> {
        Arc::new(CONVERTER)
    }

    fn resource_parser(&self) -> Arc<dyn ResourceParser> {
        Arc::new(PARSER)
    }
}

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
use crate::converter::{ResourceConverter, ResourceParser, UnmappedDevice};
use crate::plugin::{Error, Plugin, PluginType, run_discovery};
use crate::types::v1::accelerator::{Accelerator, RuntimeConfig};
use crate::types::v1::cluster::SshAuth;
use crate::types::v1::engine::Engine;
use crate::types::v1::resource::INTEL_XPU;
use crate::utils::ssh::CommandRunner;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

const DISCOVERY_COMMAND: &str = "xpu-smi discovery -j";
const VISIBLE_DEVICES_ENV: &str = "ZE_AFFINITY_MASK";

#[derive(Deserialize, Debug, Default)]
struct Discovery {
    #[serde(default)]
    device_list: Vec<Device>,
}

#[derive(Deserialize, Debug, Default)]
struct Device {
    #[serde(default)]
    device_id: Option<serde_json::Value>,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    device_name: String,
    #[serde(default)]
    device_type: String,
    #[serde(default)]
    device_function_type: String,
}

impl Device {
    fn id(&self) -> String {
        if !self.uuid.is_empty() {
            return self.uuid.clone();
        }
        match &self.device_id {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

pub struct IntelPlugin {
    runner: Arc<dyn CommandRunner>,
}

impl IntelPlugin {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Physical GPUs from `xpu-smi discovery -j`. Unreadable output counts as no
/// devices.
fn parse_discovery(node_ip: &str, output: &str) -> Vec<Accelerator> {
    let discovery: Discovery = match serde_json::from_str(output) {
        Ok(d) => d,
        Err(e) => {
            warn!(node_ip = %node_ip, error = %e, "unreadable xpu-smi output");
            return Vec::new();
        }
    };

    discovery
        .device_list
        .into_iter()
        .filter(|d| d.device_type == "GPU" && d.device_function_type == "physical")
        .map(|d| Accelerator {
            id: d.id(),
            type_: d.device_name,
        })
        .collect()
}

#[async_trait]
impl Plugin for IntelPlugin {
    fn resource_name(&self) -> &str {
        INTEL_XPU
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

        let accelerators = parse_discovery(node_ip, &output);
        debug!(node_ip = %node_ip, count = accelerators.len(), "discovered intel xpus");
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

        let indices: Vec<String> = (0..accelerators.len()).map(|i| i.to_string()).collect();
        let mut config = RuntimeConfig::with_image_suffix(engines::image_suffix(INTEL_XPU));
        config
            .env
            .insert(VISIBLE_DEVICES_ENV.to_owned(), indices.join(","));
        config.options.push("--device=/dev/dri".to_owned());
        Ok(config)
    }

    async fn get_support_engines(&self) -> Result<Vec<Engine>, Error> {
        engines::catalog(INTEL_XPU)
    }

    // TODO: map intel_xpu to gpu.intel.com/xe once the device plugin label set is settled.
    fn resource_converter(&self) -> Arc<dyn ResourceConverter> {
        Arc::new(UnmappedDevice)
    }

    fn resource_parser(&self) -> Arc<dyn ResourceParser> {
        Arc::new(UnmappedDevice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FakeRunner, test_ssh_auth};

    const DISCOVERY_OUTPUT: &str = r#"{
        "device_list": [
            {"device_id": 0, "device_name": "Intel(R) Data Center GPU Max 1550", "device_type": "GPU",
             "device_function_type": "physical", "uuid": "00000000-0000-0029-0000-002f0bd58086"},
            {"device_id": 1, "device_name": "Intel(R) Data Center GPU Max 1550", "device_type": "GPU",
             "device_function_type": "virtual", "uuid": "00000000-0000-0029-0000-002f0bd58087"},
            {"device_id": 2, "device_name": "Intel(R) Data Center GPU Max 1550", "device_type": "GPU",
             "device_function_type": "physical"}
        ]
    }"#;

    #[test]
    fn test_parse_discovery_keeps_physical_gpus() {
        let accelerators = parse_discovery("10.0.0.4", DISCOVERY_OUTPUT);
        assert_eq!(accelerators.len(), 2);
        assert_eq!(accelerators[0].id, "00000000-0000-0029-0000-002f0bd58086");
        assert_eq!(accelerators[1].id, "2", "falls back to device_id");
        assert_eq!(accelerators[0].type_, "Intel(R) Data Center GPU Max 1550");
    }

    #[test]
    fn test_parse_discovery_bad_json() {
        assert!(parse_discovery("10.0.0.4", "xpu-smi: not found").is_empty());
    }

    #[tokio::test]
    async fn test_runtime_config() {
        let runner = FakeRunner::default().output("xpu-smi", DISCOVERY_OUTPUT);
        let config = IntelPlugin::new(Arc::new(runner))
            .get_node_runtime_config("10.0.0.4", &test_ssh_auth())
            .await
            .expect("runtime config");

        assert_eq!(config.image_suffix, "xpu");
        assert_eq!(config.env.get("ZE_AFFINITY_MASK").map(String::as_str), Some("0,1"));
        assert_eq!(config.options, vec!["--device=/dev/dri".to_owned()]);
    }
}

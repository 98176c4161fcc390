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
use crate::types::v1::resource::NVIDIA_GPU;
use crate::utils::ssh::CommandRunner;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub static PROFILE: DeviceProfile = DeviceProfile {
    family: NVIDIA_GPU,
    kubernetes_resource: "nvidia.com/gpu",
    product_label: "nvidia.com/gpu.product",
    ray_product_prefixes: &["NVIDIA", "Tesla", "Quadro", "GeForce"],
};

pub static CONVERTER: DeviceConverter = DeviceConverter::new(&PROFILE);
pub static PARSER: DeviceParser = DeviceParser::new(&PROFILE);

const DISCOVERY_COMMAND: &str = "nvidia-smi --query-gpu=name,uuid --format=csv,noheader";
const DOCKER_RUNTIME: &str = "nvidia";
const VISIBLE_DEVICES_ENV: &str = "NVIDIA_VISIBLE_DEVICES";

pub struct NvidiaPlugin {
    runner: Arc<dyn CommandRunner>,
}

impl NvidiaPlugin {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

/// Parses `name, uuid` lines; the uuid is the device id.
fn parse_smi_output(output: &str) -> Vec<Accelerator> {
    output
        .lines()
        .filter_map(|line| {
            let (name, uuid) = line.split_once(',')?;
            let (name, uuid) = (name.trim(), uuid.trim());
            if uuid.is_empty() {
                return None;
            }
            Some(Accelerator {
                id: uuid.to_owned(),
                type_: name.to_owned(),
            })
        })
        .collect()
}

#[async_trait]
impl Plugin for NvidiaPlugin {
    fn resource_name(&self) -> &str {
        NVIDIA_GPU
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

        let accelerators = parse_smi_output(&output);
        debug!(node_ip = %node_ip, count = accelerators.len(), "discovered nvidia gpus");
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

        let devices: Vec<&str> = accelerators.iter().map(|a| a.id.as_str()).collect();
        let mut config = RuntimeConfig::with_image_suffix(engines::image_suffix(NVIDIA_GPU));
        config.runtime = DOCKER_RUNTIME.to_owned();
        config
            .env
            .insert(VISIBLE_DEVICES_ENV.to_owned(), devices.join(","));
        config.options.push("--gpus=all".to_owned());
        Ok(config)
    }

    async fn get_support_engines(&self) -> Result<Vec<Engine>, Error> {
        engines::catalog(NVIDIA_GPU)
    }

    fn resource_converter(&self) -> Arc<dyn ResourceConverter> {
        Arc::new(CONVERTER)
    }

    fn resource_parser(&self) -> Arc<dyn ResourceParser> {
        Arc::new(PARSER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{FakeRunner, test_ssh_auth};
    use crate::types::v1::resource::ResourceSpec;
    use std::collections::BTreeMap;

    const SMI_OUTPUT: &str = "\
Tesla T4, GPU-6f1d9c3e-0000-0000-0000-000000000001
Tesla T4, GPU-6f1d9c3e-0000-0000-0000-000000000002
";

    #[test]
    fn test_parse_smi_output() {
        let accelerators = parse_smi_output(SMI_OUTPUT);
        assert_eq!(accelerators.len(), 2);
        assert_eq!(accelerators[0].type_, "Tesla T4");
        assert_eq!(accelerators[1].id, "GPU-6f1d9c3e-0000-0000-0000-000000000002");

        assert!(parse_smi_output("").is_empty());
        assert!(parse_smi_output("garbage without comma").is_empty());
    }

    #[tokio::test]
    async fn test_runtime_config_with_gpus() {
        let runner = FakeRunner::default().output("nvidia-smi", SMI_OUTPUT);
        let plugin = NvidiaPlugin::new(Arc::new(runner));

        let config = plugin
            .get_node_runtime_config("10.0.0.1", &test_ssh_auth())
            .await
            .expect("runtime config");
        assert_eq!(config.runtime, "nvidia");
        assert_eq!(
            config.env.get("NVIDIA_VISIBLE_DEVICES").map(String::as_str),
            Some(
                "GPU-6f1d9c3e-0000-0000-0000-000000000001,GPU-6f1d9c3e-0000-0000-0000-000000000002"
            )
        );
        assert_eq!(config.options, vec!["--gpus=all".to_owned()]);
    }

    #[tokio::test]
    async fn test_missing_tool_means_cpu_node() {
        let runner = FakeRunner::default().command_failed("nvidia-smi");
        let plugin = NvidiaPlugin::new(Arc::new(runner));

        let accelerators = plugin
            .get_node_accelerator("10.0.0.1", &test_ssh_auth())
            .await
            .expect("command failure is an empty answer");
        assert!(accelerators.is_empty());

        let config = plugin
            .get_node_runtime_config("10.0.0.1", &test_ssh_auth())
            .await
            .expect("runtime config");
        assert_eq!(config, RuntimeConfig::with_image_suffix("cpu"));
    }

    #[tokio::test]
    async fn test_unreachable_node_is_an_error() {
        let plugin = NvidiaPlugin::new(Arc::new(FakeRunner::unreachable()));
        let err = plugin
            .get_node_accelerator("10.0.0.1", &test_ssh_auth())
            .await
            .expect_err("unreachable");
        assert!(err.is_connection_failed());
    }

    #[tokio::test]
    async fn test_convert_to_ray_family_scoped() {
        let spec = ResourceSpec::new()
            .with_cpu(8.0)
            .with_gpu(2.0)
            .with_memory(32.0)
            .with_accelerator(NVIDIA_GPU, Some("Tesla-T4"));

        let ray = CONVERTER
            .convert_to_ray(&spec)
            .await
            .expect("ok")
            .expect("nvidia spec converts");
        assert_eq!(ray.num_gpus, 2.0);
        assert_eq!(ray.num_cpus, 0.0);
        assert_eq!(ray.memory, 0.0);
        assert_eq!(ray.resources, BTreeMap::from([("Tesla-T4".to_owned(), 2.0)]));
    }

    #[tokio::test]
    async fn test_kubernetes_requests_match_limits() {
        let spec = ResourceSpec::new()
            .with_gpu(2.0)
            .with_accelerator(NVIDIA_GPU, Some("Tesla-V100"));

        let k8s = CONVERTER
            .convert_to_kubernetes(&spec)
            .await
            .expect("ok")
            .expect("converts");
        assert_eq!(k8s.requests.get("nvidia.com/gpu").map(String::as_str), Some("2"));
        assert_eq!(k8s.requests, k8s.limits);
        assert_eq!(
            k8s.node_selector.get("nvidia.com/gpu.product").map(String::as_str),
            Some("Tesla-V100")
        );
    }

    #[tokio::test]
    async fn test_parse_from_ray() {
        let resources = BTreeMap::from([
            ("GPU".to_owned(), 2.0),
            ("NVIDIA_L20".to_owned(), 2.0),
            ("custom".to_owned(), 5.0),
        ]);

        let info = PARSER
            .parse_from_ray(&resources)
            .await
            .expect("ok")
            .expect("nvidia product present");
        assert_eq!(info.accelerator_groups.len(), 1);
        let group = &info.accelerator_groups[NVIDIA_GPU];
        assert_eq!(group.quantity, 2.0);
        assert_eq!(
            group.product_groups,
            BTreeMap::from([("NVIDIA_L20".to_owned(), 2.0)])
        );
    }

    #[tokio::test]
    async fn test_round_trip_through_ray_and_kubernetes() {
        let spec = ResourceSpec::new()
            .with_gpu(4.0)
            .with_accelerator(NVIDIA_GPU, Some("Tesla-A100"));

        let ray = CONVERTER.to_ray(&spec).expect("converts");
        let mut ray_resources = ray.resources.clone();
        ray_resources.insert("GPU".to_owned(), ray.num_gpus);
        let from_ray = PARSER.from_ray(&ray_resources).expect("parses");

        let k8s = CONVERTER.to_kubernetes(&spec).expect("converts");
        let from_k8s = PARSER
            .from_kubernetes(&k8s.limits, &k8s.node_selector)
            .expect("parses");

        assert_eq!(from_ray.accelerator_groups, from_k8s.accelerator_groups);
        let group = &from_k8s.accelerator_groups[NVIDIA_GPU];
        assert_eq!(group.quantity, 4.0);
        assert_eq!(group.product_groups.get("Tesla-A100"), Some(&4.0));
    }

    #[tokio::test]
    async fn test_parse_from_kubernetes_absent_resource() {
        let info = PARSER
            .parse_from_kubernetes(&BTreeMap::from([("cpu".to_owned(), "4".to_owned())]), &BTreeMap::new())
            .await
            .expect("ok");
        assert!(info.is_none());
    }
}

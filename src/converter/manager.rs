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

use super::{Error, RAY_CPU, RAY_MEMORY, ResourceConverter, ResourceParser};
use crate::plugin::{ConverterNotFoundSnafu, ValidationSnafu};
use crate::types::v1::resource::{
    ClusterResources, GIB, KubernetesResourceSpec, RayResourceSpec, ResourceInfo, ResourceSpec,
};
use crate::utils::quantity;
use k8s_openapi::api::core::v1 as corev1;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::{debug, warn};

static GLOBAL: LazyLock<Arc<ConverterManager>> =
    LazyLock::new(|| Arc::new(ConverterManager::new()));

/// The process-wide converter manager.
pub fn global() -> Arc<ConverterManager> {
    GLOBAL.clone()
}

/// Dispatches resource translation to the converter of the requested
/// accelerator family, falling back to a CPU-only translation when no family
/// is requested.
#[derive(Default)]
pub struct ConverterManager {
    converters: RwLock<BTreeMap<String, Arc<dyn ResourceConverter>>>,
    parsers: RwLock<BTreeMap<String, Arc<dyn ResourceParser>>>,
}

impl ConverterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_converter(
        &self,
        family: &str,
        converter: Arc<dyn ResourceConverter>,
    ) -> Result<(), Error> {
        if family.is_empty() {
            return ValidationSnafu {
                message: "converter family must not be empty",
            }
            .fail();
        }

        let mut converters = self.converters.write().unwrap_or_else(PoisonError::into_inner);
        if converters.insert(family.to_owned(), converter).is_some() {
            warn!(family = %family, "overwriting registered resource converter");
        } else {
            debug!(family = %family, "registered resource converter");
        }
        Ok(())
    }

    pub fn register_parser(
        &self,
        family: &str,
        parser: Arc<dyn ResourceParser>,
    ) -> Result<(), Error> {
        if family.is_empty() {
            return ValidationSnafu {
                message: "parser family must not be empty",
            }
            .fail();
        }

        let mut parsers = self.parsers.write().unwrap_or_else(PoisonError::into_inner);
        if parsers.insert(family.to_owned(), parser).is_some() {
            warn!(family = %family, "overwriting registered resource parser");
        }
        Ok(())
    }

    pub fn families(&self) -> Vec<String> {
        self.converters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn converter(&self, family: &str) -> Result<Arc<dyn ResourceConverter>, Error> {
        let converters = self.converters.read().unwrap_or_else(PoisonError::into_inner);
        match converters.get(family) {
            Some(c) => Ok(c.clone()),
            None => ConverterNotFoundSnafu {
                family,
                registered: converters.keys().cloned().collect::<Vec<_>>().join(", "),
            }
            .fail(),
        }
    }

    fn parsers(&self) -> Vec<Arc<dyn ResourceParser>> {
        self.parsers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub async fn convert_to_ray(
        &self,
        spec: &ResourceSpec,
    ) -> Result<Option<RayResourceSpec>, Error> {
        let Some(family) = spec.accelerator_type() else {
            return Ok(Some(cpu_only_ray(spec)));
        };

        let converter = self.converter(family)?;
        converter.convert_to_ray(spec).await
    }

    pub async fn convert_to_kubernetes(
        &self,
        spec: &ResourceSpec,
    ) -> Result<Option<KubernetesResourceSpec>, Error> {
        let Some(family) = spec.accelerator_type() else {
            return Ok(Some(cpu_only_kubernetes(spec)));
        };

        let converter = self.converter(family)?;
        converter.convert_to_kubernetes(spec).await
    }

    /// CPU and memory from the resource list plus every accelerator group a
    /// registered parser recognizes.
    pub async fn parse_from_kubernetes(
        &self,
        resources: &BTreeMap<String, String>,
        node_labels: &BTreeMap<String, String>,
    ) -> Result<ResourceInfo, Error> {
        let mut info = ResourceInfo {
            cpu: resources.get("cpu").map(|q| quantity::parse(q)).unwrap_or(0.0),
            memory: resources
                .get("memory")
                .map(|q| quantity::parse_gib(q))
                .unwrap_or(0.0),
            ..Default::default()
        };

        for parser in self.parsers() {
            if let Some(parsed) = parser.parse_from_kubernetes(resources, node_labels).await? {
                info.add(&parsed);
            }
        }
        Ok(info)
    }

    pub async fn parse_from_ray(
        &self,
        resources: &BTreeMap<String, f64>,
    ) -> Result<ResourceInfo, Error> {
        let mut info = ResourceInfo {
            cpu: resources.get(RAY_CPU).copied().unwrap_or(0.0),
            memory: resources.get(RAY_MEMORY).copied().unwrap_or(0.0) / GIB,
            ..Default::default()
        };

        for parser in self.parsers() {
            if let Some(parsed) = parser.parse_from_ray(resources).await? {
                info.add(&parsed);
            }
        }
        Ok(info)
    }

    /// Ray reports cluster totals and availability directly.
    pub async fn cluster_resources_from_ray(
        &self,
        total: &BTreeMap<String, f64>,
        available: &BTreeMap<String, f64>,
    ) -> Result<ClusterResources, Error> {
        let allocatable = self.parse_from_ray(total).await?;
        let mut available = self.parse_from_ray(available).await?;
        clamp_to(&mut available, &allocatable);
        Ok(ClusterResources {
            allocatable,
            available,
        })
    }

    /// Sums node allocatable capacity and subtracts the requests of pods that
    /// still hold resources.
    pub async fn cluster_resources_from_kubernetes(
        &self,
        nodes: &[corev1::Node],
        pods: &[corev1::Pod],
    ) -> Result<ClusterResources, Error> {
        let mut allocatable = ResourceInfo::default();
        let mut available = ResourceInfo::default();

        for node in nodes {
            let labels = node.metadata.labels.clone().unwrap_or_default();
            let node_allocatable: BTreeMap<String, String> = node
                .status
                .as_ref()
                .and_then(|s| s.allocatable.as_ref())
                .map(|a| a.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
                .unwrap_or_default();

            let capacity = self.parse_from_kubernetes(&node_allocatable, &labels).await?;

            let node_name = node.metadata.name.as_deref().unwrap_or_default();
            let requested = pod_requests(pods, node_name);
            let used = self.parse_from_kubernetes(&requested, &labels).await?;

            let mut free = capacity.clone();
            free.saturating_sub(&used);

            allocatable.add(&capacity);
            available.add(&free);
        }

        Ok(ClusterResources {
            allocatable,
            available,
        })
    }
}

fn clamp_to(available: &mut ResourceInfo, allocatable: &ResourceInfo) {
    available.cpu = available.cpu.min(allocatable.cpu);
    available.memory = available.memory.min(allocatable.memory);
    available
        .accelerator_groups
        .retain(|family, _| allocatable.accelerator_groups.contains_key(family));
    for (family, group) in available.accelerator_groups.iter_mut() {
        let Some(limit) = allocatable.accelerator_groups.get(family) else {
            continue;
        };
        group.quantity = group.quantity.min(limit.quantity);
        group
            .product_groups
            .retain(|product, _| limit.product_groups.contains_key(product));
        for (product, quantity) in group.product_groups.iter_mut() {
            let product_limit = limit.product_groups.get(product).copied().unwrap_or_default();
            *quantity = quantity.min(product_limit).min(group.quantity);
        }
    }
}

/// Summed container requests of the non-terminal pods bound to `node_name`.
fn pod_requests(pods: &[corev1::Pod], node_name: &str) -> BTreeMap<String, String> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();

    let running = pods.iter().filter(|pod| {
        let on_node = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name);
        let finished = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == "Succeeded" || p == "Failed");
        on_node && !finished
    });

    for pod in running {
        let containers = pod.spec.iter().flat_map(|s| s.containers.iter());
        for container in containers {
            let requests = container
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref());
            for (name, q) in requests.into_iter().flatten() {
                *totals.entry(name.clone()).or_default() += quantity::parse(&q.0);
            }
        }
    }

    totals
        .into_iter()
        .map(|(name, value)| (name, format!("{value}")))
        .collect()
}

fn cpu_only_ray(spec: &ResourceSpec) -> RayResourceSpec {
    let resources = spec
        .custom_resources()
        .iter()
        .filter_map(|(name, value)| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .map(|v| (name.clone(), v))
        })
        .collect();

    RayResourceSpec {
        num_cpus: spec.cpu(),
        num_gpus: 0.0,
        memory: spec.memory() * GIB,
        resources,
    }
}

fn cpu_only_kubernetes(spec: &ResourceSpec) -> KubernetesResourceSpec {
    let mut k8s = KubernetesResourceSpec::default();
    if spec.cpu() > 0.0 {
        k8s.set_resource("cpu", format!("{}", spec.cpu()));
    }
    if spec.memory() > 0.0 {
        k8s.set_resource("memory", quantity::format_gib(spec.memory()));
    }
    for (name, value) in spec.custom_resources() {
        k8s.set_resource(name, value.clone());
    }
    k8s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{amd, nvidia};
    use crate::types::v1::resource::{AMD_GPU, AcceleratorGroup, NVIDIA_GPU};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;

    fn manager() -> ConverterManager {
        let manager = ConverterManager::new();
        for (family, converter, parser) in [
            (
                NVIDIA_GPU,
                Arc::new(nvidia::CONVERTER) as Arc<dyn ResourceConverter>,
                Arc::new(nvidia::PARSER) as Arc<dyn ResourceParser>,
            ),
            (
                AMD_GPU,
                Arc::new(amd::CONVERTER) as Arc<dyn ResourceConverter>,
                Arc::new(amd::PARSER) as Arc<dyn ResourceParser>,
            ),
        ] {
            manager.register_converter(family, converter).expect("register converter");
            manager.register_parser(family, parser).expect("register parser");
        }
        manager
    }

    #[tokio::test]
    async fn test_cpu_only_fallback() {
        let spec = ResourceSpec::new().with_cpu(4.0).with_memory(8.0);
        let manager = manager();

        let ray = manager
            .convert_to_ray(&spec)
            .await
            .expect("cpu path never fails")
            .expect("cpu path always answers");
        assert_eq!(ray.num_cpus, 4.0);
        assert_eq!(ray.memory, 8589934592.0);
        assert_eq!(ray.num_gpus, 0.0);
        assert!(ray.resources.is_empty());

        let k8s = manager
            .convert_to_kubernetes(&spec)
            .await
            .expect("cpu path never fails")
            .expect("cpu path always answers");
        assert_eq!(k8s.requests.get("cpu").map(String::as_str), Some("4"));
        assert_eq!(k8s.requests.get("memory").map(String::as_str), Some("8Gi"));
        assert_eq!(k8s.requests, k8s.limits);
        assert!(k8s.node_selector.is_empty());
    }

    #[tokio::test]
    async fn test_cpu_only_custom_resources() {
        let spec = ResourceSpec::new()
            .with_cpu(2.0)
            .with_custom_resource("rdma/hca", "1")
            .with_custom_resource("label", "not-a-number");
        let manager = manager();

        let ray = manager.convert_to_ray(&spec).await.expect("ok").expect("some");
        assert_eq!(ray.resources.get("rdma/hca"), Some(&1.0));
        assert!(!ray.resources.contains_key("label"));
        assert!(
            !ray.resources.keys().any(|k| k == "GPU" || k.starts_with("NVIDIA")),
            "no accelerator entries on the cpu path"
        );

        let k8s = manager.convert_to_kubernetes(&spec).await.expect("ok").expect("some");
        assert_eq!(k8s.limits.get("rdma/hca").map(String::as_str), Some("1"));
        assert_eq!(k8s.limits.get("label").map(String::as_str), Some("not-a-number"));
        assert!(!k8s.requests.contains_key("memory"));
    }

    #[tokio::test]
    async fn test_unknown_family_names_registered_ones() {
        let spec = ResourceSpec::new().with_gpu(1.0).with_accelerator("tpu", None);
        let err = manager()
            .convert_to_ray(&spec)
            .await
            .expect_err("missing converter is an error");

        assert!(err.is_not_found());
        let msg = err.to_string();
        assert!(msg.contains("tpu"));
        assert!(msg.contains("amd_gpu, nvidia_gpu"));
    }

    #[tokio::test]
    async fn test_dispatches_by_family() {
        let spec = ResourceSpec::new()
            .with_gpu(3.0)
            .with_accelerator(AMD_GPU, Some("AMD_Instinct_MI300X_OAM"));
        let k8s = manager()
            .convert_to_kubernetes(&spec)
            .await
            .expect("ok")
            .expect("amd converter answers");
        assert_eq!(k8s.requests.get("amd.com/gpu").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_rejects_empty_family() {
        let err = ConverterManager::new()
            .register_converter("", Arc::new(nvidia::CONVERTER))
            .expect_err("empty family rejected");
        assert!(err.is_validation());
    }

    #[test]
    fn test_register_overwrites() {
        let manager = manager();
        manager
            .register_converter(NVIDIA_GPU, Arc::new(nvidia::CONVERTER))
            .expect("overwrite is allowed");
        assert_eq!(manager.families(), vec![AMD_GPU.to_owned(), NVIDIA_GPU.to_owned()]);
    }

    #[tokio::test]
    async fn test_parse_from_ray_whole_node() {
        let resources: BTreeMap<String, f64> = [
            ("CPU".to_owned(), 32.0),
            ("memory".to_owned(), 64.0 * GIB),
            ("GPU".to_owned(), 2.0),
            ("NVIDIA_L20".to_owned(), 2.0),
        ]
        .into_iter()
        .collect();

        let info = manager().parse_from_ray(&resources).await.expect("parse");
        assert_eq!(info.cpu, 32.0);
        assert_eq!(info.memory, 64.0);
        assert_eq!(info.accelerator_groups.len(), 1);
        assert_eq!(info.accelerator_groups[NVIDIA_GPU].quantity, 2.0);
    }

    fn node(name: &str, cpu: &str, memory: &str, gpus: &str, product: &str) -> corev1::Node {
        corev1::Node {
            metadata: metav1::ObjectMeta {
                name: Some(name.to_owned()),
                labels: Some(
                    [("nvidia.com/gpu.product".to_owned(), product.to_owned())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            status: Some(corev1::NodeStatus {
                allocatable: Some(
                    [
                        ("cpu".to_owned(), Quantity(cpu.to_owned())),
                        ("memory".to_owned(), Quantity(memory.to_owned())),
                        ("nvidia.com/gpu".to_owned(), Quantity(gpus.to_owned())),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(node: &str, phase: &str, cpu: &str, gpus: &str) -> corev1::Pod {
        corev1::Pod {
            spec: Some(corev1::PodSpec {
                node_name: Some(node.to_owned()),
                containers: vec![corev1::Container {
                    name: "engine".to_owned(),
                    resources: Some(corev1::ResourceRequirements {
                        requests: Some(
                            [
                                ("cpu".to_owned(), Quantity(cpu.to_owned())),
                                ("nvidia.com/gpu".to_owned(), Quantity(gpus.to_owned())),
                            ]
                            .into_iter()
                            .collect(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(corev1::PodStatus {
                phase: Some(phase.to_owned()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cluster_resources_from_kubernetes() {
        let nodes = vec![
            node("a", "16", "64Gi", "4", "Tesla-T4"),
            node("b", "8", "32Gi", "2", "Tesla-T4"),
        ];
        let pods = vec![
            pod("a", "Running", "4", "1"),
            pod("a", "Succeeded", "8", "2"),
            pod("b", "Pending", "500m", "2"),
        ];

        let resources = manager()
            .cluster_resources_from_kubernetes(&nodes, &pods)
            .await
            .expect("parse cluster");

        assert_eq!(resources.allocatable.cpu, 24.0);
        assert_eq!(resources.allocatable.memory, 96.0);
        assert_eq!(resources.allocatable.accelerator_groups[NVIDIA_GPU].quantity, 6.0);

        assert_eq!(resources.available.cpu, 19.5);
        let gpus = &resources.available.accelerator_groups[NVIDIA_GPU];
        assert_eq!(gpus.quantity, 3.0);
        assert_eq!(gpus.product_groups["Tesla-T4"], 3.0);
        assert!(resources.available.fits_within(&resources.allocatable));
    }

    #[tokio::test]
    async fn test_cluster_resources_from_ray_clamps() {
        let total: BTreeMap<String, f64> = [("CPU".to_owned(), 8.0)].into_iter().collect();
        let available: BTreeMap<String, f64> = [("CPU".to_owned(), 10.0)].into_iter().collect();

        let resources = manager()
            .cluster_resources_from_ray(&total, &available)
            .await
            .expect("parse");
        assert_eq!(resources.available.cpu, 8.0);
    }

    #[test]
    fn test_clamp_products_to_allocatable() {
        let allocatable = ResourceInfo {
            cpu: 8.0,
            memory: 32.0,
            accelerator_groups: [(
                NVIDIA_GPU.to_owned(),
                AcceleratorGroup::new(2.0, Some("NVIDIA_L20")),
            )]
            .into_iter()
            .collect(),
        };
        let mut stale = AcceleratorGroup::new(4.0, Some("NVIDIA_L20"));
        stale.product_groups.insert("Tesla-T4".to_owned(), 1.0);
        let mut available = ResourceInfo {
            cpu: 8.0,
            memory: 32.0,
            accelerator_groups: [(NVIDIA_GPU.to_owned(), stale)].into_iter().collect(),
        };

        clamp_to(&mut available, &allocatable);
        let gpus = &available.accelerator_groups[NVIDIA_GPU];
        assert_eq!(gpus.quantity, 2.0);
        assert_eq!(gpus.product_groups.len(), 1);
        assert_eq!(gpus.product_groups["NVIDIA_L20"], 2.0);
        assert!(available.fits_within(&allocatable));
    }
}

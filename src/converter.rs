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

//! Translation between [`ResourceSpec`] and substrate resource formats.
//!
//! Converters go from the canonical request to Ray or Kubernetes; parsers go
//! from observed Ray or Kubernetes resources back to [`ResourceInfo`]. Each
//! pair is scoped to one accelerator family and answers `None` for anything
//! outside it.

pub mod manager;

pub use crate::plugin::Error;

use crate::types::v1::resource::{
    AcceleratorGroup, KubernetesResourceSpec, RayResourceSpec, ResourceInfo, ResourceSpec,
};
use crate::utils::quantity;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Ray's built-in resource names.
pub const RAY_CPU: &str = "CPU";
pub const RAY_GPU: &str = "GPU";
pub const RAY_MEMORY: &str = "memory";

#[async_trait]
pub trait ResourceConverter: Send + Sync {
    /// `None` when the spec requests no GPU or belongs to another family.
    async fn convert_to_ray(&self, spec: &ResourceSpec) -> Result<Option<RayResourceSpec>, Error>;

    /// `None` when the spec requests no GPU or belongs to another family.
    async fn convert_to_kubernetes(
        &self,
        spec: &ResourceSpec,
    ) -> Result<Option<KubernetesResourceSpec>, Error>;
}

#[async_trait]
pub trait ResourceParser: Send + Sync {
    /// `None` when the family's resource is absent from `resources`.
    async fn parse_from_kubernetes(
        &self,
        resources: &BTreeMap<String, String>,
        node_labels: &BTreeMap<String, String>,
    ) -> Result<Option<ResourceInfo>, Error>;

    /// `None` when no product of this family appears in `resources`.
    async fn parse_from_ray(
        &self,
        resources: &BTreeMap<String, f64>,
    ) -> Result<Option<ResourceInfo>, Error>;
}

/// The constants that pin a converter/parser pair to one GPU family.
#[derive(Debug)]
pub struct DeviceProfile {
    pub family: &'static str,
    /// Extended resource name, e.g. `nvidia.com/gpu`.
    pub kubernetes_resource: &'static str,
    /// Node label carrying the product model.
    pub product_label: &'static str,
    /// Prefixes of Ray custom resources naming this family's products.
    pub ray_product_prefixes: &'static [&'static str],
}

impl DeviceProfile {
    fn owns(&self, spec: &ResourceSpec) -> bool {
        spec.gpu() > 0.0 && spec.accelerator_type() == Some(self.family)
    }

    fn is_ray_product(&self, name: &str) -> bool {
        self.ray_product_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceConverter {
    profile: &'static DeviceProfile,
}

impl DeviceConverter {
    pub const fn new(profile: &'static DeviceProfile) -> Self {
        Self { profile }
    }

    pub fn to_ray(&self, spec: &ResourceSpec) -> Option<RayResourceSpec> {
        if !self.profile.owns(spec) {
            return None;
        }

        let gpu = spec.gpu();
        let mut ray = RayResourceSpec {
            num_gpus: gpu,
            ..Default::default()
        };
        if let Some(product) = spec.accelerator_product() {
            ray.resources.insert(product.to_owned(), gpu);
        }
        Some(ray)
    }

    pub fn to_kubernetes(&self, spec: &ResourceSpec) -> Option<KubernetesResourceSpec> {
        if !self.profile.owns(spec) {
            return None;
        }

        let mut k8s = KubernetesResourceSpec::default();
        // Extended resources only take whole devices.
        k8s.set_resource(
            self.profile.kubernetes_resource,
            format!("{}", spec.gpu().ceil() as u64),
        );
        if let Some(product) = spec.accelerator_product() {
            k8s.node_selector
                .insert(self.profile.product_label.to_owned(), product.to_owned());
        }
        Some(k8s)
    }
}

#[async_trait]
impl ResourceConverter for DeviceConverter {
    async fn convert_to_ray(&self, spec: &ResourceSpec) -> Result<Option<RayResourceSpec>, Error> {
        Ok(self.to_ray(spec))
    }

    async fn convert_to_kubernetes(
        &self,
        spec: &ResourceSpec,
    ) -> Result<Option<KubernetesResourceSpec>, Error> {
        Ok(self.to_kubernetes(spec))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceParser {
    profile: &'static DeviceProfile,
}

impl DeviceParser {
    pub const fn new(profile: &'static DeviceProfile) -> Self {
        Self { profile }
    }

    pub fn from_kubernetes(
        &self,
        resources: &BTreeMap<String, String>,
        node_labels: &BTreeMap<String, String>,
    ) -> Option<ResourceInfo> {
        let quantity = quantity::parse(resources.get(self.profile.kubernetes_resource)?);
        let product = node_labels
            .get(self.profile.product_label)
            .map(String::as_str)
            .filter(|p| !p.is_empty());

        Some(ResourceInfo::with_group(
            self.profile.family,
            AcceleratorGroup::new(quantity, product),
        ))
    }

    pub fn from_ray(&self, resources: &BTreeMap<String, f64>) -> Option<ResourceInfo> {
        let product_groups: BTreeMap<String, f64> = resources
            .iter()
            .filter(|(name, _)| self.profile.is_ray_product(name))
            .map(|(name, quantity)| (name.clone(), *quantity))
            .collect();

        if product_groups.is_empty() {
            return None;
        }

        let quantity = resources
            .get(RAY_GPU)
            .copied()
            .unwrap_or_else(|| product_groups.values().sum());

        Some(ResourceInfo::with_group(
            self.profile.family,
            AcceleratorGroup {
                quantity,
                product_groups,
            },
        ))
    }
}

#[async_trait]
impl ResourceParser for DeviceParser {
    async fn parse_from_kubernetes(
        &self,
        resources: &BTreeMap<String, String>,
        node_labels: &BTreeMap<String, String>,
    ) -> Result<Option<ResourceInfo>, Error> {
        Ok(self.from_kubernetes(resources, node_labels))
    }

    async fn parse_from_ray(
        &self,
        resources: &BTreeMap<String, f64>,
    ) -> Result<Option<ResourceInfo>, Error> {
        Ok(self.from_ray(resources))
    }
}

/// Converter and parser for a family that is reserved but not yet mapped to
/// any substrate resource. Everything reads as "not mine".
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmappedDevice;

#[async_trait]
impl ResourceConverter for UnmappedDevice {
    async fn convert_to_ray(&self, _spec: &ResourceSpec) -> Result<Option<RayResourceSpec>, Error> {
        Ok(None)
    }

    async fn convert_to_kubernetes(
        &self,
        _spec: &ResourceSpec,
    ) -> Result<Option<KubernetesResourceSpec>, Error> {
        Ok(None)
    }
}

#[async_trait]
impl ResourceParser for UnmappedDevice {
    async fn parse_from_kubernetes(
        &self,
        _resources: &BTreeMap<String, String>,
        _node_labels: &BTreeMap<String, String>,
    ) -> Result<Option<ResourceInfo>, Error> {
        Ok(None)
    }

    async fn parse_from_ray(
        &self,
        _resources: &BTreeMap<String, f64>,
    ) -> Result<Option<ResourceInfo>, Error> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_PROFILE: DeviceProfile = DeviceProfile {
        family: "test_gpu",
        kubernetes_resource: "example.com/gpu",
        product_label: "example.com/gpu.product",
        ray_product_prefixes: &["EX"],
    };

    #[test]
    fn test_fractional_gpu_rounds_up_for_kubernetes() {
        let spec = ResourceSpec::new()
            .with_gpu(1.5)
            .with_accelerator("test_gpu", None);
        let k8s = DeviceConverter::new(&TEST_PROFILE)
            .to_kubernetes(&spec)
            .expect("owned spec converts");

        assert_eq!(k8s.requests.get("example.com/gpu").map(String::as_str), Some("2"));
        assert_eq!(k8s.requests, k8s.limits);
        assert!(k8s.node_selector.is_empty());
    }

    #[test]
    fn test_zero_gpu_is_not_owned() {
        let spec = ResourceSpec::new()
            .with_gpu(0.0)
            .with_accelerator("test_gpu", Some("EX-1"));
        let converter = DeviceConverter::new(&TEST_PROFILE);
        assert!(converter.to_ray(&spec).is_none());
        assert!(converter.to_kubernetes(&spec).is_none());
    }

    #[test]
    fn test_ray_quantity_falls_back_to_product_sum() {
        let resources: BTreeMap<String, f64> =
            [("EX-1".to_owned(), 1.0), ("EX-2".to_owned(), 2.0)].into_iter().collect();
        let info = DeviceParser::new(&TEST_PROFILE)
            .from_ray(&resources)
            .expect("products found");

        let group = &info.accelerator_groups["test_gpu"];
        assert_eq!(group.quantity, 3.0);
        assert_eq!(group.product_groups.len(), 2);
    }

    #[tokio::test]
    async fn test_unmapped_device_claims_nothing() {
        let spec = ResourceSpec::new().with_gpu(1.0).with_accelerator("intel_xpu", None);
        assert!(UnmappedDevice.convert_to_ray(&spec).await.expect("ok").is_none());
        assert!(
            UnmappedDevice
                .parse_from_ray(&BTreeMap::new())
                .await
                .expect("ok")
                .is_none()
        );
    }
}

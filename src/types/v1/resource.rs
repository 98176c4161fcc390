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

//! Canonical, substrate-agnostic resource model.
//!
//! A [`ResourceSpec`] is what users declare; [`RayResourceSpec`] and
//! [`KubernetesResourceSpec`] are what the converters emit for each substrate;
//! [`ResourceInfo`] and [`ClusterResources`] are what the parsers observe.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Reserved accelerator key holding the accelerator family.
pub const ACCELERATOR_TYPE_KEY: &str = "type";
/// Reserved accelerator key holding the product model.
pub const ACCELERATOR_PRODUCT_KEY: &str = "product";

pub const NVIDIA_GPU: &str = "nvidia_gpu";
pub const AMD_GPU: &str = "amd_gpu";
pub const INTEL_XPU: &str = "intel_xpu";

/// Bytes per GiB, the unit of [`ResourceSpec::memory`].
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Accelerator families with a compiled-in plugin.
///
/// External plugins may register any other family name, so the rest of the
/// crate keys families by plain strings; this enum only names the built-ins.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
    IntoStaticStr,
)]
pub enum AcceleratorType {
    #[serde(rename = "nvidia_gpu")]
    #[strum(serialize = "nvidia_gpu")]
    NvidiaGpu,

    #[serde(rename = "amd_gpu")]
    #[strum(serialize = "amd_gpu")]
    AmdGpu,

    #[serde(rename = "intel_xpu")]
    #[strum(serialize = "intel_xpu")]
    IntelXpu,
}

impl AcceleratorType {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// The `accelerator` section of a [`ResourceSpec`].
///
/// On the wire this is a flat string map; `type` and `product` are lifted
/// into fields and every other key lands in `custom`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AcceleratorSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,

    #[serde(flatten)]
    pub custom: BTreeMap<String, String>,
}

impl AcceleratorSpec {
    pub fn is_empty(&self) -> bool {
        self.type_.is_none() && self.product.is_none() && self.custom.is_empty()
    }

    /// Rebuilds the flat map form, reserved keys included.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.custom.clone();
        if let Some(t) = &self.type_ {
            map.insert(ACCELERATOR_TYPE_KEY.to_owned(), t.clone());
        }
        if let Some(p) = &self.product {
            map.insert(ACCELERATOR_PRODUCT_KEY.to_owned(), p.clone());
        }
        map
    }
}

impl From<BTreeMap<String, String>> for AcceleratorSpec {
    fn from(mut map: BTreeMap<String, String>) -> Self {
        let type_ = map.remove(ACCELERATOR_TYPE_KEY);
        let product = map.remove(ACCELERATOR_PRODUCT_KEY);
        Self {
            type_,
            product,
            custom: map,
        }
    }
}

/// Canonical resource request.
///
/// Numeric fields keep their textual form and are parsed on access; a value
/// that does not parse reads as `0`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ResourceSpec {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "numeric_text"
    )]
    pub cpu: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "numeric_text"
    )]
    pub gpu: Option<String>,

    /// Memory in GiB.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "numeric_text"
    )]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "AcceleratorSpec::is_empty")]
    pub accelerator: AcceleratorSpec,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumericText {
    Text(String),
    Number(serde_json::Number),
}

/// Accepts both `"8"` and `8` for numeric fields.
fn numeric_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<NumericText>::deserialize(deserializer)?.map(|v| match v {
            NumericText::Text(s) => s,
            NumericText::Number(n) => n.to_string(),
        }),
    )
}

fn parse_numeric(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn format_numeric(value: f64) -> String {
    format!("{value}")
}

impl ResourceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cpu(mut self, cpu: f64) -> Self {
        self.set_cpu(cpu);
        self
    }

    pub fn with_gpu(mut self, gpu: f64) -> Self {
        self.set_gpu(gpu);
        self
    }

    pub fn with_memory(mut self, memory: f64) -> Self {
        self.set_memory(memory);
        self
    }

    pub fn with_accelerator(mut self, type_: &str, product: Option<&str>) -> Self {
        self.set_accelerator_type(type_);
        if let Some(p) = product {
            self.set_accelerator_product(p);
        }
        self
    }

    pub fn with_custom_resource(mut self, name: &str, value: &str) -> Self {
        self.accelerator
            .custom
            .insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn cpu(&self) -> f64 {
        parse_numeric(self.cpu.as_deref())
    }

    pub fn gpu(&self) -> f64 {
        parse_numeric(self.gpu.as_deref())
    }

    /// Memory in GiB.
    pub fn memory(&self) -> f64 {
        parse_numeric(self.memory.as_deref())
    }

    pub fn set_cpu(&mut self, cpu: f64) {
        self.cpu = Some(format_numeric(cpu));
    }

    pub fn set_gpu(&mut self, gpu: f64) {
        self.gpu = Some(format_numeric(gpu));
    }

    pub fn set_memory(&mut self, memory: f64) {
        self.memory = Some(format_numeric(memory));
    }

    /// The accelerator family, if one is declared. An empty string counts as
    /// undeclared.
    pub fn accelerator_type(&self) -> Option<&str> {
        self.accelerator.type_.as_deref().filter(|t| !t.is_empty())
    }

    pub fn set_accelerator_type(&mut self, type_: &str) {
        self.accelerator.type_ = Some(type_.to_owned());
    }

    pub fn accelerator_product(&self) -> Option<&str> {
        self.accelerator.product.as_deref().filter(|p| !p.is_empty())
    }

    pub fn set_accelerator_product(&mut self, product: &str) {
        self.accelerator.product = Some(product.to_owned());
    }

    /// All accelerator keys except `type` and `product`.
    pub fn custom_resources(&self) -> &BTreeMap<String, String> {
        &self.accelerator.custom
    }

    pub fn has_accelerator(&self) -> bool {
        self.gpu() > 0.0 && self.accelerator_type().is_some()
    }
}

/// Ray-native resource request.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RayResourceSpec {
    #[serde(default)]
    pub num_cpus: f64,

    #[serde(default)]
    pub num_gpus: f64,

    /// Memory in bytes.
    #[serde(default)]
    pub memory: f64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, f64>,
}

/// Kubernetes container resources plus the scheduling hints that go with them.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct KubernetesResourceSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl KubernetesResourceSpec {
    /// Sets the same quantity as request and limit.
    pub fn set_resource(&mut self, name: &str, quantity: String) {
        self.requests.insert(name.to_owned(), quantity.clone());
        self.limits.insert(name.to_owned(), quantity);
    }
}

/// Observed capacity of one accelerator family.
///
/// `product_groups` refines `quantity`: the product quantities add up to it.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AcceleratorGroup {
    #[serde(default)]
    pub quantity: f64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub product_groups: BTreeMap<String, f64>,
}

impl AcceleratorGroup {
    pub fn new(quantity: f64, product: Option<&str>) -> Self {
        let mut product_groups = BTreeMap::new();
        if let Some(p) = product {
            product_groups.insert(p.to_owned(), quantity);
        }
        Self {
            quantity,
            product_groups,
        }
    }

    fn add(&mut self, other: &AcceleratorGroup) {
        self.quantity += other.quantity;
        for (product, quantity) in &other.product_groups {
            *self.product_groups.entry(product.clone()).or_default() += quantity;
        }
    }

    fn saturating_sub(&mut self, other: &AcceleratorGroup) {
        self.quantity = (self.quantity - other.quantity).max(0.0);
        for (product, quantity) in &other.product_groups {
            if let Some(current) = self.product_groups.get_mut(product) {
                *current = (*current - quantity).max(0.0);
            }
        }
    }
}

/// Observed capacity at one node, or summed over many.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ResourceInfo {
    #[serde(default)]
    pub cpu: f64,

    /// Memory in GiB.
    #[serde(default)]
    pub memory: f64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accelerator_groups: BTreeMap<String, AcceleratorGroup>,
}

impl ResourceInfo {
    pub fn with_group(family: &str, group: AcceleratorGroup) -> Self {
        Self {
            accelerator_groups: [(family.to_owned(), group)].into_iter().collect(),
            ..Default::default()
        }
    }

    /// Componentwise sum.
    pub fn add(&mut self, other: &ResourceInfo) {
        self.cpu += other.cpu;
        self.memory += other.memory;
        for (family, group) in &other.accelerator_groups {
            self.accelerator_groups
                .entry(family.clone())
                .or_default()
                .add(group);
        }
    }

    /// Componentwise difference, clamped at zero. Families absent from
    /// `self` are ignored.
    pub fn saturating_sub(&mut self, other: &ResourceInfo) {
        self.cpu = (self.cpu - other.cpu).max(0.0);
        self.memory = (self.memory - other.memory).max(0.0);
        for (family, group) in &other.accelerator_groups {
            if let Some(current) = self.accelerator_groups.get_mut(family) {
                current.saturating_sub(group);
            }
        }
    }

    /// True when every component of `self` is at most the one in `other`.
    pub fn fits_within(&self, other: &ResourceInfo) -> bool {
        self.cpu <= other.cpu
            && self.memory <= other.memory
            && self.accelerator_groups.iter().all(|(family, group)| {
                other.accelerator_groups.get(family).is_some_and(|o| {
                    group.quantity <= o.quantity
                        && group.product_groups.iter().all(|(p, q)| {
                            o.product_groups.get(p).is_some_and(|oq| q <= oq)
                        })
                })
            })
    }
}

/// Observed capacity of a whole cluster. `available` never exceeds
/// `allocatable`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ClusterResources {
    #[serde(default)]
    pub allocatable: ResourceInfo,

    #[serde(default)]
    pub available: ResourceInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_fields_parse_on_access() {
        let spec: ResourceSpec = serde_json::from_value(serde_json::json!({
            "cpu": "8",
            "gpu": 2,
            "memory": "not-a-number",
        }))
        .expect("decode spec");

        assert_eq!(spec.cpu(), 8.0);
        assert_eq!(spec.gpu(), 2.0);
        assert_eq!(spec.memory(), 0.0, "unparseable memory reads as zero");
        assert_eq!(spec.gpu.as_deref(), Some("2"), "numbers are kept as text");
    }

    #[test]
    fn test_accelerator_reserved_keys_are_lifted() {
        let spec: ResourceSpec = serde_json::from_value(serde_json::json!({
            "gpu": "1",
            "accelerator": {
                "type": "nvidia_gpu",
                "product": "Tesla-V100",
                "rdma/hca": "1",
            },
        }))
        .expect("decode spec");

        assert_eq!(spec.accelerator_type(), Some(NVIDIA_GPU));
        assert_eq!(spec.accelerator_product(), Some("Tesla-V100"));
        assert_eq!(spec.custom_resources().len(), 1);
        assert_eq!(
            spec.custom_resources().get("rdma/hca").map(String::as_str),
            Some("1")
        );

        let back = serde_json::to_value(&spec).expect("encode spec");
        assert_eq!(back["accelerator"]["type"], "nvidia_gpu");
        assert_eq!(back["accelerator"]["rdma/hca"], "1");
    }

    #[test]
    fn test_has_accelerator_requires_gpu_and_type() {
        let gpu_only = ResourceSpec::new().with_gpu(1.0);
        assert!(!gpu_only.has_accelerator());

        let type_only = ResourceSpec::new().with_accelerator(NVIDIA_GPU, None);
        assert!(!type_only.has_accelerator());

        let both = ResourceSpec::new()
            .with_gpu(0.5)
            .with_accelerator(NVIDIA_GPU, None);
        assert!(both.has_accelerator());

        let mut empty_type = ResourceSpec::new().with_gpu(1.0);
        empty_type.set_accelerator_type("");
        assert!(!empty_type.has_accelerator());
    }

    #[test]
    fn test_accelerator_spec_map_conversion() {
        let map: BTreeMap<String, String> = [
            ("type".to_owned(), "amd_gpu".to_owned()),
            ("foo".to_owned(), "bar".to_owned()),
        ]
        .into_iter()
        .collect();

        let spec = AcceleratorSpec::from(map.clone());
        assert_eq!(spec.type_.as_deref(), Some("amd_gpu"));
        assert!(spec.product.is_none());
        assert_eq!(spec.to_map(), map);
    }

    #[test]
    fn test_resource_info_algebra() {
        let mut total = ResourceInfo {
            cpu: 16.0,
            memory: 64.0,
            ..ResourceInfo::with_group(NVIDIA_GPU, AcceleratorGroup::new(4.0, Some("Tesla-T4")))
        };
        let used = ResourceInfo {
            cpu: 20.0,
            memory: 8.0,
            ..ResourceInfo::with_group(NVIDIA_GPU, AcceleratorGroup::new(1.0, Some("Tesla-T4")))
        };

        let mut available = total.clone();
        available.saturating_sub(&used);
        assert_eq!(available.cpu, 0.0, "cpu clamps at zero");
        assert_eq!(available.memory, 56.0);
        assert_eq!(available.accelerator_groups[NVIDIA_GPU].quantity, 3.0);
        assert_eq!(
            available.accelerator_groups[NVIDIA_GPU].product_groups["Tesla-T4"],
            3.0
        );
        assert!(available.fits_within(&total));

        total.add(&used);
        assert_eq!(total.accelerator_groups[NVIDIA_GPU].quantity, 5.0);
        assert!(!total.fits_within(&available));
    }

    #[test]
    fn test_accelerator_type_strings() {
        assert_eq!(AcceleratorType::NvidiaGpu.as_str(), NVIDIA_GPU);
        assert_eq!(AcceleratorType::AmdGpu.to_string(), AMD_GPU);
        assert_eq!(
            INTEL_XPU.parse::<AcceleratorType>().ok(),
            Some(AcceleratorType::IntelXpu)
        );
    }
}

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

//! Compiled-in accelerator plugins.
//!
//! One module per family. Each probes nodes through a [`CommandRunner`],
//! serves the shared engine catalog with its own images, and hands out the
//! converter/parser pair for its family.

pub mod amd;
pub mod engines;
pub mod intel;
pub mod nvidia;

use crate::plugin::Error;
use crate::plugin::registry::PluginRegistry;
use crate::utils::ssh::CommandRunner;
use std::sync::Arc;
use tracing::info;

pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Image suffix for nodes without accelerators.
pub const CPU_IMAGE_SUFFIX: &str = "cpu";

/// Installs the NVIDIA, AMD and Intel plugins into `registry`.
pub fn register_internal_plugins(
    registry: &PluginRegistry,
    runner: Arc<dyn CommandRunner>,
) -> Result<(), Error> {
    registry.register(Arc::new(nvidia::NvidiaPlugin::new(runner.clone())))?;
    registry.register(Arc::new(amd::AmdPlugin::new(runner.clone())))?;
    registry.register(Arc::new(intel::IntelPlugin::new(runner)))?;

    info!(plugins = ?registry.names(), "internal plugins registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FakeRunner;
    use crate::types::v1::resource::{AMD_GPU, INTEL_XPU, NVIDIA_GPU};

    #[test]
    fn test_register_internal_plugins() {
        let registry = PluginRegistry::default();
        register_internal_plugins(&registry, Arc::new(FakeRunner::default()))
            .expect("internal plugins register");

        assert_eq!(registry.names(), vec![AMD_GPU, INTEL_XPU, NVIDIA_GPU]);
        assert_eq!(
            registry.converters().families(),
            vec![AMD_GPU.to_owned(), INTEL_XPU.to_owned(), NVIDIA_GPU.to_owned()]
        );
    }
}

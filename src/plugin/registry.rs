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

use super::api::PluginInfo;
use super::{Error, Plugin, PluginNotFoundSnafu};
use crate::converter::manager::{self, ConverterManager};
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::{info, warn};

static GLOBAL: LazyLock<Arc<PluginRegistry>> =
    LazyLock::new(|| Arc::new(PluginRegistry::new(manager::global())));

/// The process-wide plugin registry, sharing the global converter manager.
pub fn global() -> Arc<PluginRegistry> {
    GLOBAL.clone()
}

/// Accelerator family -> plugin.
///
/// Registering a plugin also installs its converter and parser, so the
/// converter manager always reflects the plugins known here.
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Arc<dyn Plugin>>>,
    converters: Arc<ConverterManager>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(Arc::new(ConverterManager::new()))
    }
}

impl PluginRegistry {
    pub fn new(converters: Arc<ConverterManager>) -> Self {
        Self {
            plugins: RwLock::new(BTreeMap::new()),
            converters,
        }
    }

    pub fn converters(&self) -> &Arc<ConverterManager> {
        &self.converters
    }

    /// Last write wins.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), Error> {
        let name = plugin.resource_name().to_owned();

        self.converters
            .register_converter(&name, plugin.resource_converter())?;
        self.converters
            .register_parser(&name, plugin.resource_parser())?;

        let plugin_type = plugin.plugin_type();
        let version = plugin.version().to_owned();
        let previous = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), plugin);

        if let Some(previous) = previous {
            warn!(
                resource_name = %name,
                previous_type = %previous.plugin_type(),
                previous_version = %previous.version(),
                "replacing registered plugin"
            );
        }
        info!(
            resource_name = %name,
            plugin_type = %plugin_type,
            version = %version,
            "plugin registered"
        );
        Ok(())
    }

    pub fn get(&self, resource_name: &str) -> Result<Arc<dyn Plugin>, Error> {
        let plugins = self.plugins.read().unwrap_or_else(PoisonError::into_inner);
        match plugins.get(resource_name) {
            Some(plugin) => Ok(plugin.clone()),
            None => PluginNotFoundSnafu {
                resource_name,
                registered: plugins.keys().cloned().collect::<Vec<_>>().join(", "),
            }
            .fail(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|plugin| PluginInfo {
                resource_name: plugin.resource_name().to_owned(),
                type_: plugin.plugin_type(),
                version: plugin.version().to_owned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::{amd::AmdPlugin, nvidia::NvidiaPlugin};
    use crate::plugin::PluginType;
    use crate::tests::FakeRunner;
    use crate::types::v1::resource::{AMD_GPU, NVIDIA_GPU};

    fn nvidia() -> Arc<dyn Plugin> {
        Arc::new(NvidiaPlugin::new(Arc::new(FakeRunner::default())))
    }

    #[test]
    fn test_lookup_is_exact() {
        let registry = PluginRegistry::default();
        registry.register(nvidia()).expect("register");

        assert!(registry.get(NVIDIA_GPU).is_ok());

        let err = registry.get("nvidia").err().expect("no prefix matching");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("nvidia_gpu"));
    }

    #[test]
    fn test_register_twice_keeps_one() {
        let registry = PluginRegistry::default();
        registry.register(nvidia()).expect("register");
        registry.register(nvidia()).expect("register again");

        let plugins = registry.list();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].resource_name, NVIDIA_GPU);
        assert_eq!(plugins[0].type_, PluginType::Internal);
        assert_eq!(registry.converters().families(), vec![NVIDIA_GPU.to_owned()]);
    }

    #[test]
    fn test_concurrent_readers_see_registered_plugin() {
        let registry = Arc::new(PluginRegistry::default());
        registry.register(nvidia()).expect("register");

        let readers: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    if i == 0 {
                        registry
                            .register(Arc::new(AmdPlugin::new(Arc::new(FakeRunner::default()))))
                            .expect("register amd");
                    }
                    for _ in 0..100 {
                        let plugin = registry.get(NVIDIA_GPU).expect("nvidia stays registered");
                        assert_eq!(plugin.resource_name(), NVIDIA_GPU);
                    }
                })
            })
            .collect();

        for reader in readers {
            reader.join().expect("reader thread");
        }
        assert_eq!(registry.names(), vec![AMD_GPU.to_owned(), NVIDIA_GPU.to_owned()]);
    }
}

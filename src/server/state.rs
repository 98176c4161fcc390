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

use crate::plugin::registry::PluginRegistry;
use std::sync::Arc;

/// Shared by every registration API handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PluginRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }
}

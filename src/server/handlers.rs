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

use axum::{Json, body::Bytes, extract::State};
use snafu::ResultExt;
use std::sync::Arc;
use tracing::info;

use crate::plugin::api::{PluginInfo, RegisterRequest};
use crate::plugin::external::ExternalPlugin;
use crate::server::{
    error::{self, Error, Result},
    state::AppState,
};

/// Installs an external plugin, replacing any plugin of the same family.
pub async fn register_plugin(State(state): State<AppState>, body: Bytes) -> Result<()> {
    let request: RegisterRequest =
        serde_json::from_slice(&body).map_err(|e| Error::BadRequest {
            message: format!("malformed registration body: {}", e),
        })?;

    if request.resource_name.trim().is_empty() {
        return error::BadRequestSnafu {
            message: "resource_name must not be empty",
        }
        .fail();
    }
    if request.endpoint.trim().is_empty() {
        return error::BadRequestSnafu {
            message: "endpoint must not be empty",
        }
        .fail();
    }

    let plugin = ExternalPlugin::new(&request.resource_name, &request.endpoint, &request.version)
        .context(error::PluginSnafu)?;

    state
        .registry
        .register(Arc::new(plugin))
        .context(error::PluginSnafu)?;

    info!(
        resource_name = %request.resource_name,
        endpoint = %request.endpoint,
        version = %request.version,
        "external plugin registered"
    );
    Ok(())
}

pub async fn list_plugins(State(state): State<AppState>) -> Json<Vec<PluginInfo>> {
    Json(state.registry.list())
}

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

use axum::{
    Router,
    routing::{get, post},
};

use crate::plugin::api::{LIST_PLUGINS_PATH, REGISTER_PATH};
use crate::server::{handlers, state::AppState};

/// Plugin registration routes
pub fn plugin_routes() -> Router<AppState> {
    Router::new()
        .route(REGISTER_PATH, post(handlers::register_plugin))
        .route(LIST_PLUGINS_PATH, get(handlers::list_plugins))
}

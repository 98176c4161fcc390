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

//! Control-plane HTTP surface: external plugin registration.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

use crate::plugin::api::{LIST_PLUGINS_PATH, REGISTER_PATH};
use crate::server::state::AppState;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3001";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(routes::plugin_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serves the registration API until the listener fails or `shutdown` resolves.
pub async fn run(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Plugin registration server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  - POST {}", REGISTER_PATH);
    tracing::info!("  - GET  {}", LIST_PLUGINS_PATH);
    tracing::info!("  - GET  /healthz");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

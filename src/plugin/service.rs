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

//! Server side of the external plugin HTTP API: exposes any [`Plugin`].

use super::api::{
    AcceleratorsResponse, CONVERT_TO_KUBERNETES_PATH, CONVERT_TO_RAY_PATH, NODE_ACCELERATOR_PATH,
    NODE_RUNTIME_CONFIG_PATH, NodeRequest, PARSE_FROM_KUBERNETES_PATH, PARSE_FROM_RAY_PATH,
    PING_PATH, ParseFromKubernetesRequest, ParseFromRayRequest, SUPPORT_ENGINES_PATH,
    SupportEnginesResponse,
};
use super::{Error, Plugin};
use crate::types::v1::accelerator::RuntimeConfig;
use crate::types::v1::resource::{
    KubernetesResourceSpec, RayResourceSpec, ResourceInfo, ResourceSpec,
};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

type PluginState = State<Arc<dyn Plugin>>;

pub fn router(plugin: Arc<dyn Plugin>) -> Router {
    Router::new()
        .route(PING_PATH, get(ping))
        .route(NODE_ACCELERATOR_PATH, post(node_accelerator))
        .route(NODE_RUNTIME_CONFIG_PATH, post(node_runtime_config))
        .route(SUPPORT_ENGINES_PATH, get(support_engines))
        .route(CONVERT_TO_RAY_PATH, post(convert_to_ray))
        .route(CONVERT_TO_KUBERNETES_PATH, post(convert_to_kubernetes))
        .route(PARSE_FROM_RAY_PATH, post(parse_from_ray))
        .route(PARSE_FROM_KUBERNETES_PATH, post(parse_from_kubernetes))
        .with_state(plugin)
        .layer(TraceLayer::new_for_http())
}

/// Plain-text error bodies, status by error kind.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            e if e.is_connection_failed() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(status = %status, error = %self, "plugin request failed");
        }

        (status, self.to_string()).into_response()
    }
}

/// A missing, `null` or malformed body is a validation error.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Error> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(|e| Error::Validation {
        message: format!("malformed request body: {e}"),
    })?;
    if value.is_null() {
        return Err(Error::Validation {
            message: "request body must not be null".to_owned(),
        });
    }
    serde_json::from_value(value).map_err(|e| Error::Validation {
        message: format!("malformed request body: {e}"),
    })
}

async fn ping(State(plugin): PluginState) -> Result<StatusCode, Error> {
    plugin.ping().await?;
    Ok(StatusCode::OK)
}

async fn node_accelerator(
    State(plugin): PluginState,
    body: Bytes,
) -> Result<Json<AcceleratorsResponse>, Error> {
    let request: NodeRequest = parse_body(&body)?;
    let accelerators = plugin
        .get_node_accelerator(&request.node_ip, &request.ssh_auth)
        .await?;
    Ok(Json(AcceleratorsResponse { accelerators }))
}

async fn node_runtime_config(
    State(plugin): PluginState,
    body: Bytes,
) -> Result<Json<RuntimeConfig>, Error> {
    let request: NodeRequest = parse_body(&body)?;
    let config = plugin
        .get_node_runtime_config(&request.node_ip, &request.ssh_auth)
        .await?;
    Ok(Json(config))
}

async fn support_engines(
    State(plugin): PluginState,
) -> Result<Json<SupportEnginesResponse>, Error> {
    let engines = plugin.get_support_engines().await?;
    Ok(Json(SupportEnginesResponse { engines }))
}

async fn convert_to_ray(
    State(plugin): PluginState,
    body: Bytes,
) -> Result<Json<Option<RayResourceSpec>>, Error> {
    let spec: ResourceSpec = parse_body(&body)?;
    let ray = plugin.resource_converter().convert_to_ray(&spec).await?;
    Ok(Json(ray))
}

async fn convert_to_kubernetes(
    State(plugin): PluginState,
    body: Bytes,
) -> Result<Json<Option<KubernetesResourceSpec>>, Error> {
    let spec: ResourceSpec = parse_body(&body)?;
    let k8s = plugin
        .resource_converter()
        .convert_to_kubernetes(&spec)
        .await?;
    Ok(Json(k8s))
}

async fn parse_from_ray(
    State(plugin): PluginState,
    body: Bytes,
) -> Result<Json<Option<ResourceInfo>>, Error> {
    let request: ParseFromRayRequest = parse_body(&body)?;
    let info = plugin
        .resource_parser()
        .parse_from_ray(&request.resources)
        .await?;
    Ok(Json(info))
}

async fn parse_from_kubernetes(
    State(plugin): PluginState,
    body: Bytes,
) -> Result<Json<Option<ResourceInfo>>, Error> {
    let request: ParseFromKubernetesRequest = parse_body(&body)?;
    let info = plugin
        .resource_parser()
        .parse_from_kubernetes(&request.resources, &request.node_labels)
        .await?;
    Ok(Json(info))
}

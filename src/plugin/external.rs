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

//! Client side of the external plugin HTTP API.

use super::api::{
    AcceleratorsResponse, CONVERT_TO_KUBERNETES_PATH, CONVERT_TO_RAY_PATH, NODE_ACCELERATOR_PATH,
    NODE_RUNTIME_CONFIG_PATH, NodeRequest, PARSE_FROM_KUBERNETES_PATH, PARSE_FROM_RAY_PATH,
    PING_PATH, ParseFromKubernetesRequest, ParseFromRayRequest, REGISTER_PATH, RegisterRequest,
    SUPPORT_ENGINES_PATH, SupportEnginesResponse,
};
use super::{Error, HttpClientSnafu, HttpSnafu, InvalidEndpointSnafu, Plugin, PluginType};
use crate::converter::{ResourceConverter, ResourceParser};
use crate::types::v1::accelerator::{Accelerator, RuntimeConfig};
use crate::types::v1::cluster::SshAuth;
use crate::types::v1::engine::Engine;
use crate::types::v1::resource::{
    KubernetesResourceSpec, RayResourceSpec, ResourceInfo, ResourceSpec,
};
use crate::utils::ssh;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client bound to one plugin server.
#[derive(Clone, Debug)]
pub struct PluginClient {
    base_url: String,
    http: reqwest::Client,
}

impl PluginClient {
    /// Plugin servers are operator-provisioned and commonly use self-signed
    /// certificates, so verification is off.
    pub fn new(endpoint: &str) -> Result<Self, Error> {
        let url = reqwest::Url::parse(endpoint).map_err(|e| Error::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return InvalidEndpointSnafu {
                endpoint,
                message: format!("unsupported scheme '{}'", url.scheme()),
            }
            .fail();
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .context(HttpClientSnafu)?;

        Ok(Self {
            base_url: endpoint.trim_end_matches('/').to_owned(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, Error> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "calling external plugin");

        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await.context(HttpSnafu { path })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(Error::Remote {
            path: path.to_owned(),
            status: status.as_u16(),
            message: message.trim().to_owned(),
        })
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, Error> {
        let response = self.send(Method::GET, path, None).await?;
        response.json().await.context(HttpSnafu { path })
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, Error> {
        let body = serde_json::to_vec(body).map_err(|e| Error::Validation {
            message: e.to_string(),
        })?;
        let response = self.send(Method::POST, path, Some(body)).await?;
        response.json().await.context(HttpSnafu { path })
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.send(Method::GET, PING_PATH, None).await.map(|_| ())
    }
}

/// Announces a plugin server to the control plane's registration API.
pub async fn register_with_control_plane(
    control_plane: &str,
    request: &RegisterRequest,
) -> Result<(), Error> {
    let client = PluginClient::new(control_plane)?;
    let body = serde_json::to_vec(request).map_err(|e| Error::Validation {
        message: e.to_string(),
    })?;
    client
        .send(Method::POST, REGISTER_PATH, Some(body))
        .await
        .map(|_| ())
}

/// The plugin server answers 503 when it could not reach the node; keep that
/// distinct from other failures.
fn node_error(node_ip: &str, err: Error) -> Error {
    match err {
        Error::Remote {
            status, message, ..
        } if status == StatusCode::SERVICE_UNAVAILABLE.as_u16() => Error::Probe {
            source: ssh::Error::ConnectionFailed {
                node_ip: node_ip.to_owned(),
                message,
            },
        },
        other => other,
    }
}

#[async_trait]
impl ResourceConverter for PluginClient {
    async fn convert_to_ray(&self, spec: &ResourceSpec) -> Result<Option<RayResourceSpec>, Error> {
        self.post(CONVERT_TO_RAY_PATH, spec).await
    }

    async fn convert_to_kubernetes(
        &self,
        spec: &ResourceSpec,
    ) -> Result<Option<KubernetesResourceSpec>, Error> {
        self.post(CONVERT_TO_KUBERNETES_PATH, spec).await
    }
}

#[async_trait]
impl ResourceParser for PluginClient {
    async fn parse_from_kubernetes(
        &self,
        resources: &BTreeMap<String, String>,
        node_labels: &BTreeMap<String, String>,
    ) -> Result<Option<ResourceInfo>, Error> {
        let request = ParseFromKubernetesRequest {
            resources: resources.clone(),
            node_labels: node_labels.clone(),
        };
        self.post(PARSE_FROM_KUBERNETES_PATH, &request).await
    }

    async fn parse_from_ray(
        &self,
        resources: &BTreeMap<String, f64>,
    ) -> Result<Option<ResourceInfo>, Error> {
        let request = ParseFromRayRequest {
            resources: resources.clone(),
        };
        self.post(PARSE_FROM_RAY_PATH, &request).await
    }
}

/// A plugin registered over HTTP. Every capability call is forwarded.
pub struct ExternalPlugin {
    resource_name: String,
    version: String,
    client: Arc<PluginClient>,
}

impl ExternalPlugin {
    pub fn new(resource_name: &str, endpoint: &str, version: &str) -> Result<Self, Error> {
        Ok(Self {
            resource_name: resource_name.to_owned(),
            version: version.to_owned(),
            client: Arc::new(PluginClient::new(endpoint)?),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }
}

#[async_trait]
impl Plugin for ExternalPlugin {
    fn resource_name(&self) -> &str {
        &self.resource_name
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::External
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn ping(&self) -> Result<(), Error> {
        self.client.ping().await
    }

    async fn get_node_accelerator(
        &self,
        node_ip: &str,
        auth: &SshAuth,
    ) -> Result<Vec<Accelerator>, Error> {
        let request = NodeRequest {
            node_ip: node_ip.to_owned(),
            ssh_auth: auth.clone(),
        };
        let response: AcceleratorsResponse = self
            .client
            .post(NODE_ACCELERATOR_PATH, &request)
            .await
            .map_err(|e| node_error(node_ip, e))?;
        Ok(response.accelerators)
    }

    async fn get_node_runtime_config(
        &self,
        node_ip: &str,
        auth: &SshAuth,
    ) -> Result<RuntimeConfig, Error> {
        let request = NodeRequest {
            node_ip: node_ip.to_owned(),
            ssh_auth: auth.clone(),
        };
        self.client
            .post(NODE_RUNTIME_CONFIG_PATH, &request)
            .await
            .map_err(|e| node_error(node_ip, e))
    }

    async fn get_support_engines(&self) -> Result<Vec<Engine>, Error> {
        let response: SupportEnginesResponse = self.client.get(SUPPORT_ENGINES_PATH).await?;
        Ok(response.engines)
    }

    fn resource_converter(&self) -> Arc<dyn ResourceConverter> {
        self.client.clone()
    }

    fn resource_parser(&self) -> Arc<dyn ResourceParser> {
        self.client.clone()
    }
}

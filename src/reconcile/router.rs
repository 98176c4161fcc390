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

//! The in-cluster inference router.
//!
//! Rendering is pure: cluster -> [`RouterVariables`] -> manifest bundle. The
//! [`RouterComponent`] applies the bundle through the deployer, then checks
//! the Deployment and Service until both are ready and an endpoint URL can be
//! derived.

use crate::context::{self, Context};
use crate::deployer::{self, KubernetesDeployer};
use crate::types::v1::cluster::{AccessMode, Cluster};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::DynamicObject;
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

pub const ROUTER_NAME: &str = "router";
pub const ROUTER_PORT: i32 = 8000;
pub const ROUTER_IMAGE: &str = "neutree/router";
pub const INFERENCE_APP_LABEL: &str = "inference";

const TEMPLATE_NAME: &str = "router";
const TEMPLATE: &str = include_str!("templates/router.yaml");

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to render router manifest: {}", source))]
    Render { source: minijinja::Error },

    #[snafu(display("rendered router manifest is invalid: {}", source))]
    Manifest { source: serde_yaml_ng::Error },

    #[snafu(transparent)]
    Deploy { source: deployer::Error },

    #[snafu(transparent)]
    Context { source: context::Error },

    #[snafu(display("router {} '{}' not found", kind, name))]
    NotFound { kind: String, name: String },

    #[snafu(display("router service type '{}' is not supported", service_type))]
    UnsupportedServiceType { service_type: String },

    #[snafu(display("router not ready: {}", report))]
    NotReady { report: ReadinessReport },

    #[snafu(display("router did not become ready within {:?}: {}", timeout, report))]
    ReadinessTimeout {
        timeout: Duration,
        report: ReadinessReport,
    },
}

impl Error {
    /// Not-ready conditions the next reconcile may resolve.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NotFound { .. } | Error::NotReady { .. } | Error::ReadinessTimeout { .. } => {
                true
            }
            Error::Context { source } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_apply_failed(&self) -> bool {
        matches!(self, Error::Deploy { source } if source.is_apply_rejected())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ReadinessTimeout { .. })
    }
}

/// Everything the router manifest is rendered from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RouterVariables {
    pub name: String,
    pub namespace: String,
    pub cluster: String,
    pub workspace: String,
    pub image: String,
    pub replicas: u32,
    pub resources: BTreeMap<String, String>,
    pub access_mode: AccessMode,
    pub service_type: String,
    pub port: i32,
    pub discovery_selector: String,
}

impl RouterVariables {
    pub fn from_cluster(cluster: &Cluster, namespace: &str, image_prefix: &str) -> Self {
        let router = cluster.router_spec();
        let version = router.version.clone().unwrap_or_default();
        let access_mode = router.access_mode();
        let prefix = image_prefix.trim_end_matches('/');

        Self {
            name: ROUTER_NAME.to_owned(),
            namespace: namespace.to_owned(),
            cluster: cluster.name().to_owned(),
            workspace: cluster.workspace().to_owned(),
            image: format!("{prefix}/{ROUTER_IMAGE}:{version}"),
            replicas: router.replicas(),
            resources: router.resources(),
            access_mode,
            service_type: access_mode.to_string(),
            port: ROUTER_PORT,
            discovery_selector: format!(
                "cluster={},workspace={},app={}",
                cluster.name(),
                cluster.workspace(),
                INFERENCE_APP_LABEL
            ),
        }
    }
}

/// Renders the bundle as YAML text.
pub fn render_yaml(vars: &RouterVariables) -> Result<String, Error> {
    let mut env = Environment::new();
    env.add_template(TEMPLATE_NAME, TEMPLATE).context(RenderSnafu)?;
    env.get_template(TEMPLATE_NAME)
        .context(RenderSnafu)?
        .render(vars)
        .context(RenderSnafu)
}

/// Renders the bundle and splits it into objects.
pub fn render(vars: &RouterVariables) -> Result<Vec<DynamicObject>, Error> {
    let yaml = render_yaml(vars)?;
    let mut objects = Vec::new();

    for document in serde_yaml_ng::Deserializer::from_str(&yaml) {
        let value = serde_yaml_ng::Value::deserialize(document).context(ManifestSnafu)?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml_ng::from_value(value).context(ManifestSnafu)?);
    }
    Ok(objects)
}

/// Per-component readiness, reported with every not-ready error.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    pub deployment_ready: bool,
    pub service_ready: bool,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_address: Option<String>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.deployment_ready && self.service_ready
    }

    pub fn observe(deployment: Option<&Deployment>, service: Option<&Service>) -> Self {
        let (desired_replicas, ready_replicas) = deployment.map(replica_counts).unwrap_or_default();
        Self {
            deployment_ready: deployment.is_some_and(deployment_ready),
            service_ready: service.is_some_and(service_ready),
            desired_replicas,
            ready_replicas,
            load_balancer_address: service.and_then(load_balancer_address),
        }
    }
}

impl fmt::Display for ReadinessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deployment_ready={} ({}/{} replicas), service_ready={}, load_balancer={}",
            self.deployment_ready,
            self.ready_replicas,
            self.desired_replicas,
            self.service_ready,
            self.load_balancer_address.as_deref().unwrap_or("<none>")
        )
    }
}

fn replica_counts(deployment: &Deployment) -> (i32, i32) {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    (desired, ready)
}

/// The controller has observed the latest generation and every desired
/// replica is ready.
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let generation = deployment.metadata.generation.unwrap_or(0);
    let observed = deployment
        .status
        .as_ref()
        .and_then(|s| s.observed_generation)
        .unwrap_or(0);
    let (desired, ready) = replica_counts(deployment);

    observed >= generation && ready == desired
}

fn service_type(service: &Service) -> &str {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .unwrap_or("ClusterIP")
}

fn load_balancer_address(service: &Service) -> Option<String> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?;

    ingress
        .ip
        .clone()
        .filter(|ip| !ip.is_empty())
        .or_else(|| ingress.hostname.clone().filter(|h| !h.is_empty()))
}

fn node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .first()?
        .node_port
}

fn service_port(service: &Service) -> i32 {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|p| p.port)
        .unwrap_or(ROUTER_PORT)
}

/// LoadBalancer services need an ingress address; NodePort services need an
/// assigned port.
pub fn service_ready(service: &Service) -> bool {
    match service_type(service) {
        "LoadBalancer" => load_balancer_address(service).is_some(),
        "NodePort" => node_port(service).is_some(),
        _ => false,
    }
}

/// `http://<ingress>:<port>` for LoadBalancer, `http://<api-server-host>:<node-port>`
/// for NodePort.
pub fn service_endpoint(service: &Service, api_server_host: &str) -> Result<String, Error> {
    match service_type(service) {
        "LoadBalancer" => match load_balancer_address(service) {
            Some(address) => Ok(format!("http://{}:{}", address, service_port(service))),
            None => NotReadySnafu {
                report: ReadinessReport::observe(None, Some(service)),
            }
            .fail(),
        },
        "NodePort" => match node_port(service) {
            Some(port) => Ok(format!("http://{api_server_host}:{port}")),
            None => NotReadySnafu {
                report: ReadinessReport::observe(None, Some(service)),
            }
            .fail(),
        },
        other => UnsupportedServiceTypeSnafu {
            service_type: other,
        }
        .fail(),
    }
}

/// The endpoint URL, once both components are ready.
pub fn route_endpoint(
    deployment: &Deployment,
    service: &Service,
    api_server_host: &str,
) -> Result<String, Error> {
    let report = ReadinessReport::observe(Some(deployment), Some(service));
    if !report.deployment_ready {
        return NotReadySnafu { report }.fail();
    }
    service_endpoint(service, api_server_host)
}

/// One reconcile of one cluster's router.
pub struct RouterComponent {
    vars: RouterVariables,
    ctx: Context,
    deployer: KubernetesDeployer,
}

impl RouterComponent {
    pub fn new(cluster: &Cluster, ctx: Context, namespace: &str, image_prefix: &str) -> Self {
        let vars = RouterVariables::from_cluster(cluster, namespace, image_prefix);
        let deployer =
            KubernetesDeployer::new(ctx.client.clone(), namespace, &vars.cluster, &vars.workspace);
        Self { vars, ctx, deployer }
    }

    pub fn variables(&self) -> &RouterVariables {
        &self.vars
    }

    /// Applies the rendered bundle; returns the number of changed objects.
    pub async fn reconcile(&self) -> Result<usize, Error> {
        let objects = render(&self.vars)?;
        let total = objects.len();
        let changed = self.deployer.apply(objects).await?;

        info!(
            cluster = %self.vars.cluster,
            workspace = %self.vars.workspace,
            changed,
            total,
            "router manifests applied"
        );
        Ok(changed)
    }

    async fn observe(&self) -> Result<(Option<Deployment>, Option<Service>), Error> {
        let namespace = self.deployer.namespace();
        let deployment = self.ctx.get_opt::<Deployment>(&self.vars.name, namespace).await?;
        let service = self.ctx.get_opt::<Service>(&self.vars.name, namespace).await?;
        Ok((deployment, service))
    }

    pub async fn readiness(&self) -> Result<ReadinessReport, Error> {
        let (deployment, service) = self.observe().await?;
        Ok(ReadinessReport::observe(deployment.as_ref(), service.as_ref()))
    }

    pub async fn route_endpoint(&self) -> Result<String, Error> {
        let (deployment, service) = self.observe().await?;
        let deployment = deployment.ok_or_else(|| Error::NotFound {
            kind: "Deployment".to_owned(),
            name: self.vars.name.clone(),
        })?;
        let service = service.ok_or_else(|| Error::NotFound {
            kind: "Service".to_owned(),
            name: self.vars.name.clone(),
        })?;

        route_endpoint(&deployment, &service, self.ctx.api_server_host())
    }

    /// Polls until the router is ready and returns its endpoint.
    pub async fn wait_ready(&self, timeout: Duration, interval: Duration) -> Result<String, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.route_endpoint().await {
                Ok(endpoint) => return Ok(endpoint),
                Err(e) if e.is_retryable() && Instant::now() + interval < deadline => {
                    debug!(cluster = %self.vars.cluster, error = %e, "router not ready yet");
                    tokio::time::sleep(interval).await;
                }
                Err(e) if e.is_retryable() => {
                    let report = self.readiness().await?;
                    return ReadinessTimeoutSnafu { timeout, report }.fail();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Removes the router. `true` once nothing owned remains.
    pub async fn delete(&self) -> Result<bool, Error> {
        let objects = render(&self.vars)?;
        let gone = self.deployer.delete(&objects).await?;
        if gone {
            info!(cluster = %self.vars.cluster, workspace = %self.vars.workspace, "router deleted");
        }
        Ok(gone)
    }
}

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

use crate::accelerator::register_internal_plugins;
use crate::config::{PluginServerArgs, RenderRouterArgs, ServerArgs};
use crate::controller::Controller;
use crate::plugin::api::RegisterRequest;
use crate::reconcile::router::{self, RouterVariables};
use crate::server::state::AppState;
use crate::storage::RestStorage;
use crate::types::v1::API_VERSION;
use crate::types::v1::cluster::{
    Cluster, ClusterConfig, ClusterSpec, ClusterType, KubernetesClusterConfig, RouterSpec,
};
use crate::types::v1::metadata::Metadata;
use crate::utils::ssh::SshRunner;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub mod accelerator;
pub mod config;
mod context;
pub mod controller;
pub mod converter;
pub mod deployer;
pub mod error_policy;
pub mod plugin;
pub mod reconcile;
pub mod scheme;
pub mod server;
pub mod storage;
pub mod types;
pub mod utils;


pub use context::Context;

/// Both kube and reqwest build rustls clients; pin the process to ring.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .try_init();
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("failed to listen for shutdown signal: {}", e);
            }
            info!("shutdown signal received");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

/// Runs the control plane: plugin registration API plus the cluster
/// controller, until ctrl-c.
pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    install_crypto_provider();

    let registry = plugin::registry::global();
    register_internal_plugins(&registry, Arc::new(SshRunner::default()))?;

    let storage = Arc::new(RestStorage::new(&args.storage_url, args.storage_token.clone())?);
    let cancel = CancellationToken::new();

    let server = tokio::spawn(server::run(
        args.plugin_server_addr,
        AppState::new(registry),
        cancel.clone().cancelled_owned(),
    ));

    let controller = Controller::new(storage, args.settings(), args.reconcile_interval());
    let controller = tokio::spawn(controller.run(cancel.clone()));

    shutdown_signal(cancel.clone()).await;

    if let Err(e) = controller.await {
        error!("controller task failed: {}", e);
    }
    server.await??;
    Ok(())
}

/// Serves one internal plugin over the external plugin HTTP API.
pub async fn run_plugin_server(args: PluginServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    install_crypto_provider();

    let registry = plugin::registry::global();
    register_internal_plugins(&registry, Arc::new(SshRunner::default()))?;
    let plugin = registry.get(&args.accelerator)?;

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    info!(
        resource_name = %plugin.resource_name(),
        "plugin server listening on http://{}",
        args.addr
    );

    if let (Some(control_plane), Some(advertise)) = (&args.control_plane, &args.advertise) {
        let request = RegisterRequest {
            resource_name: plugin.resource_name().to_owned(),
            endpoint: advertise.clone(),
            version: plugin.version().to_owned(),
        };
        plugin::external::register_with_control_plane(control_plane, &request).await?;
        info!(
            control_plane = %control_plane,
            endpoint = %advertise,
            "registered with control plane"
        );
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    axum::serve(listener, plugin::service::router(plugin))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

/// A cluster carrying only what the router manifest is rendered from.
fn render_cluster(args: &RenderRouterArgs) -> Cluster {
    Cluster {
        id: None,
        api_version: API_VERSION.to_owned(),
        kind: "Cluster".to_owned(),
        metadata: Metadata::new(&args.cluster, &args.workspace),
        spec: ClusterSpec {
            type_: ClusterType::Kubernetes,
            version: args.version.clone(),
            image_registry: String::new(),
            config: ClusterConfig {
                ssh_config: None,
                kubernetes_config: Some(KubernetesClusterConfig {
                    kubeconfig: String::new(),
                    router: Some(RouterSpec {
                        replicas: args.replicas,
                        access_mode: args.access_mode,
                        ..Default::default()
                    }),
                }),
            },
        },
        status: None,
    }
}

/// Prints the router manifest bundle for a cluster without touching it.
pub async fn render_router(args: RenderRouterArgs) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = render_cluster(&args);
    let vars = RouterVariables::from_cluster(&cluster, &args.namespace, &args.image_prefix);
    let manifest = router::render_yaml(&vars)?;

    let mut writer: Pin<Box<dyn AsyncWrite + Send>> = if let Some(file) = &args.file {
        Box::pin(
            tokio::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(file)
                .await?,
        )
    } else {
        Box::pin(tokio::io::stdout())
    };

    writer.write_all(manifest.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}

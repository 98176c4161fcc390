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

//! Command line and environment configuration.

use crate::controller::DEFAULT_RECONCILE_INTERVAL;
use crate::reconcile::{self, Settings};
use crate::types::v1::cluster::AccessMode;
use crate::types::v1::resource::{AMD_GPU, INTEL_XPU, NVIDIA_GPU};
use clap::Args;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_PLUGIN_ADDR: &str = "0.0.0.0:3002";

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address of the plugin registration API.
    #[arg(long, env = "NEUTREE_PLUGIN_SERVER_ADDR", default_value = crate::server::DEFAULT_ADDR)]
    pub plugin_server_addr: SocketAddr,

    /// Base URL of the REST gateway in front of the object tables.
    #[arg(long, env = "NEUTREE_STORAGE_URL")]
    pub storage_url: String,

    /// Bearer token for the REST gateway.
    #[arg(long, env = "NEUTREE_STORAGE_TOKEN", hide_env_values = true)]
    pub storage_token: Option<String>,

    /// Image prefix for clusters that name no image registry.
    #[arg(long, env = "NEUTREE_IMAGE_PREFIX", default_value = reconcile::DEFAULT_IMAGE_PREFIX)]
    pub image_prefix: String,

    /// Seconds between reconcile passes.
    #[arg(long, env = "NEUTREE_RECONCILE_INTERVAL", default_value_t = DEFAULT_RECONCILE_INTERVAL.as_secs())]
    pub reconcile_interval: u64,

    /// Seconds a router may take to become ready within one pass.
    #[arg(long, env = "NEUTREE_READINESS_TIMEOUT", default_value_t = reconcile::DEFAULT_READINESS_TIMEOUT.as_secs())]
    pub readiness_timeout: u64,

    /// Namespace the router is installed into.
    #[arg(long, env = "NEUTREE_NAMESPACE", default_value = reconcile::DEFAULT_NAMESPACE)]
    pub namespace: String,
}

impl ServerArgs {
    pub fn settings(&self) -> Settings {
        Settings {
            namespace: self.namespace.clone(),
            default_image_prefix: self.image_prefix.clone(),
            readiness_timeout: Duration::from_secs(self.readiness_timeout),
            ..Default::default()
        }
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval.max(1))
    }
}

#[derive(Args, Debug, Clone)]
pub struct PluginServerArgs {
    /// Accelerator family to serve.
    #[arg(long, env = "NEUTREE_ACCELERATOR", value_parser = [NVIDIA_GPU, AMD_GPU, INTEL_XPU])]
    pub accelerator: String,

    #[arg(long, env = "NEUTREE_PLUGIN_ADDR", default_value = DEFAULT_PLUGIN_ADDR)]
    pub addr: SocketAddr,

    /// Control plane to register with once listening.
    #[arg(long, env = "NEUTREE_CONTROL_PLANE", requires = "advertise")]
    pub control_plane: Option<String>,

    /// Endpoint the control plane should reach this plugin on.
    #[arg(long, env = "NEUTREE_PLUGIN_ADVERTISE")]
    pub advertise: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RenderRouterArgs {
    /// Cluster name.
    #[arg(long)]
    pub cluster: String,

    #[arg(long, default_value = "default")]
    pub workspace: String,

    /// Router image version.
    #[arg(long)]
    pub version: String,

    #[arg(long, default_value = reconcile::DEFAULT_IMAGE_PREFIX)]
    pub image_prefix: String,

    #[arg(long, default_value = reconcile::DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[arg(long)]
    pub replicas: Option<u32>,

    /// LoadBalancer or NodePort.
    #[arg(long)]
    pub access_mode: Option<AccessMode>,

    /// Optional output path. If not set, the output will be written to stdout.
    #[arg(short, long)]
    pub file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        server: ServerArgs,
    }

    #[test]
    fn test_server_defaults() {
        let cli = Cli::try_parse_from(["neutree-core", "--storage-url", "http://gateway:3000"])
            .expect("parse");
        let settings = cli.server.settings();

        assert_eq!(cli.server.plugin_server_addr.port(), 3001);
        assert_eq!(settings.namespace, "neutree");
        assert_eq!(settings.default_image_prefix, "docker.io");
        assert_eq!(settings.readiness_timeout, Duration::from_secs(60));
        assert_eq!(cli.server.reconcile_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_access_mode_parses() {
        #[derive(Parser)]
        struct RenderCli {
            #[command(flatten)]
            args: RenderRouterArgs,
        }

        let cli = RenderCli::try_parse_from([
            "neutree-core",
            "--cluster",
            "prod",
            "--version",
            "v1.0.0",
            "--access-mode",
            "NodePort",
        ])
        .expect("parse");
        assert_eq!(cli.args.access_mode, Some(AccessMode::NodePort));

        assert!(
            RenderCli::try_parse_from([
                "neutree-core",
                "--cluster",
                "prod",
                "--version",
                "v1.0.0",
                "--access-mode",
                "ClusterIP",
            ])
            .is_err()
        );
    }
}

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

//! Accelerator plugins.
//!
//! A plugin claims one accelerator family and answers node probes, engine
//! catalog queries, and resource translation for it. Internal plugins are
//! compiled in (see [`crate::accelerator`]); external ones live behind the
//! HTTP API in [`service`] and are reached through [`external`].

pub mod api;
pub mod external;
pub mod registry;
pub mod service;

use crate::converter::{ResourceConverter, ResourceParser};
use crate::types::v1::accelerator::{Accelerator, RuntimeConfig};
use crate::types::v1::cluster::SshAuth;
use crate::types::v1::engine::Engine;
use crate::utils::ssh::{self, CommandRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::sync::Arc;
use strum::Display;
use tracing::debug;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid request: {}", message))]
    Validation { message: String },

    #[snafu(display(
        "no plugin registered for accelerator '{}' (registered: [{}])",
        resource_name,
        registered
    ))]
    PluginNotFound {
        resource_name: String,
        registered: String,
    },

    #[snafu(display(
        "no converter registered for accelerator '{}' (registered: [{}])",
        family,
        registered
    ))]
    ConverterNotFound { family: String, registered: String },

    #[snafu(display("node probe failed: {}", source))]
    Probe { source: ssh::Error },

    #[snafu(display("invalid plugin endpoint '{}': {}", endpoint, message))]
    InvalidEndpoint { endpoint: String, message: String },

    #[snafu(display("failed to build plugin http client: {}", source))]
    HttpClient { source: reqwest::Error },

    #[snafu(display("plugin request {} failed: {}", path, source))]
    Http { path: String, source: reqwest::Error },

    #[snafu(display("plugin request {} returned {}: {}", path, status, message))]
    Remote {
        path: String,
        status: u16,
        message: String,
    },

    #[snafu(display("engine catalog error: {}", source))]
    Catalog { source: serde_json::Error },
}

impl Error {
    /// The target node was unreachable; distinct from "no accelerator found".
    pub fn is_connection_failed(&self) -> bool {
        matches!(self, Error::Probe { source } if source.is_connection_failed())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::PluginNotFound { .. } | Error::ConverterNotFound { .. }
        ) || matches!(self, Error::Remote { status: 404, .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::InvalidEndpoint { .. }
                | Error::Remote { status: 400, .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Probe { source } => source.is_connection_failed(),
            Error::Http { source, .. } => source.is_timeout() || source.is_connect(),
            Error::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PluginType {
    Internal,
    External,
}

/// Capabilities every accelerator plugin provides.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The accelerator family this plugin is responsible for.
    fn resource_name(&self) -> &str;

    fn plugin_type(&self) -> PluginType;

    fn version(&self) -> &str;

    async fn ping(&self) -> Result<(), Error>;

    /// Lists the accelerators of this family on one node. An empty list means
    /// the node was reachable and has none.
    async fn get_node_accelerator(
        &self,
        node_ip: &str,
        auth: &SshAuth,
    ) -> Result<Vec<Accelerator>, Error>;

    async fn get_node_runtime_config(
        &self,
        node_ip: &str,
        auth: &SshAuth,
    ) -> Result<RuntimeConfig, Error>;

    async fn get_support_engines(&self) -> Result<Vec<Engine>, Error>;

    fn resource_converter(&self) -> Arc<dyn ResourceConverter>;

    fn resource_parser(&self) -> Arc<dyn ResourceParser>;
}

/// Runs a discovery command. A command that ran but failed means the tool is
/// missing or found nothing, so it reads as `None`; unreachable nodes stay
/// errors.
pub(crate) async fn run_discovery(
    runner: &dyn CommandRunner,
    node_ip: &str,
    auth: &SshAuth,
    command: &str,
) -> Result<Option<String>, Error> {
    match runner.run(node_ip, auth, command).await {
        Ok(stdout) => Ok(Some(stdout)),
        Err(e) if e.is_command_failed() => {
            debug!(
                node_ip = %node_ip,
                error = %e,
                "discovery command failed, assuming no accelerator"
            );
            Ok(None)
        }
        Err(source) => Err(Error::Probe { source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FakeRunner;

    #[tokio::test]
    async fn test_run_discovery_distinguishes_failures() {
        let auth = crate::tests::test_ssh_auth();

        let runner = FakeRunner::default().command_failed("nvidia-smi");
        let out = run_discovery(&runner, "10.0.0.1", &auth, "nvidia-smi")
            .await
            .expect("command failure is not an error");
        assert!(out.is_none());

        let runner = FakeRunner::unreachable();
        let err = run_discovery(&runner, "10.0.0.1", &auth, "nvidia-smi")
            .await
            .expect_err("unreachable node is an error");
        assert!(err.is_connection_failed());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_classification() {
        let err = Error::Remote {
            path: "/v1/ping".to_owned(),
            status: 503,
            message: "busy".to_owned(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_not_found());

        let err = Error::ConverterNotFound {
            family: "foo".to_owned(),
            registered: "nvidia_gpu".to_owned(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("foo"));
        assert!(err.to_string().contains("nvidia_gpu"));
    }
}

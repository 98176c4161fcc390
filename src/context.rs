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

use crate::converter::manager::ConverterManager;
use crate::types::v1::resource::ClusterResources;
use crate::{plugin, types};
use base64::Engine as _;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use snafu::futures::TryFutureExt;
use snafu::{OptionExt, ResultExt, Snafu};
use std::fmt::Debug;
use tracing::debug;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },

    #[snafu(display("kubeconfig is not valid base64: {}", source))]
    KubeconfigEncoding { source: base64::DecodeError },

    #[snafu(display("kubeconfig is not valid utf-8: {}", source))]
    KubeconfigUtf8 { source: std::string::FromUtf8Error },

    #[snafu(display("invalid kubeconfig: {}", source))]
    Kubeconfig { source: KubeconfigError },

    #[snafu(display("failed to create Kubernetes client: {}", source))]
    Client { source: kube::Error },

    #[snafu(display("kubeconfig server url '{}' has no host", url))]
    NoApiServerHost { url: String },

    #[snafu(display("resource parsing failed: {}", source))]
    Resources { source: plugin::Error },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}

/// Access to one managed Kubernetes cluster.
#[derive(Clone)]
pub struct Context {
    pub(crate) client: Client,
    api_server_host: String,
}

impl Context {
    pub fn new(client: Client, api_server_host: &str) -> Self {
        Self {
            client,
            api_server_host: api_server_host.to_owned(),
        }
    }

    /// Builds a client from a base64-encoded kubeconfig.
    pub async fn from_kubeconfig(encoded: &str) -> Result<Self, Error> {
        let kubeconfig = decode_kubeconfig(encoded)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(KubeconfigSnafu)?;

        let api_server_host = config
            .cluster_url
            .host()
            .map(str::to_owned)
            .context(NoApiServerHostSnafu {
                url: config.cluster_url.to_string(),
            })?;
        debug!(api_server = %config.cluster_url, "building client for managed cluster");

        let client = Client::try_from(config).context(ClientSnafu)?;
        Ok(Self::new(client, &api_server_host))
    }

    /// Hostname of the API server, used to address NodePort services.
    pub fn api_server_host(&self) -> &str {
        &self.api_server_host
    }

    pub async fn get<T>(&self, name: &str, namespace: &str) -> Result<T, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).context(KubeSnafu).await
    }

    pub async fn get_opt<T>(&self, name: &str, namespace: &str) -> Result<Option<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).context(KubeSnafu).await
    }

    /// Lists across all namespaces, or the cluster for cluster-scoped kinds.
    pub async fn list_all<T>(&self) -> Result<Vec<T>, Error>
    where
        T: Clone + DeserializeOwned + Debug + Resource,
        <T as kube::Resource>::DynamicType: Default,
    {
        let api: Api<T> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).context(KubeSnafu).await?;
        Ok(list.items)
    }

    /// Allocatable and available capacity of the whole cluster.
    pub async fn cluster_resources(
        &self,
        converters: &ConverterManager,
    ) -> Result<ClusterResources, Error> {
        let nodes: Vec<corev1::Node> = self.list_all().await?;
        let pods: Vec<corev1::Pod> = self.list_all().await?;

        converters
            .cluster_resources_from_kubernetes(&nodes, &pods)
            .await
            .context(ResourcesSnafu)
    }
}

pub fn decode_kubeconfig(encoded: &str) -> Result<Kubeconfig, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context(KubeconfigEncodingSnafu)?;
    let yaml = String::from_utf8(bytes).context(KubeconfigUtf8Snafu)?;
    Kubeconfig::from_yaml(&yaml).context(KubeconfigSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kubeconfig() {
        let kubeconfig =
            decode_kubeconfig(&crate::tests::test_kubeconfig_base64()).expect("decode kubeconfig");

        assert_eq!(kubeconfig.current_context.as_deref(), Some("test"));
        let server = kubeconfig.clusters[0]
            .cluster
            .as_ref()
            .and_then(|c| c.server.as_deref());
        assert_eq!(server, Some("https://10.1.2.3:6443"));
    }

    #[test]
    fn test_decode_kubeconfig_rejects_garbage() {
        assert!(matches!(
            decode_kubeconfig("!!not-base64!!"),
            Err(Error::KubeconfigEncoding { .. })
        ));

        let not_yaml = base64::engine::general_purpose::STANDARD.encode("clusters: [oops");
        assert!(matches!(
            decode_kubeconfig(&not_yaml),
            Err(Error::Kubeconfig { .. })
        ));
    }
}

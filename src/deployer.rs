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

//! Server-side apply of label-owned object sets.
//!
//! Every object gets the owning cluster/workspace labels and the managed-by
//! label; deletion finds objects by the same selector, so anything this
//! deployer applied can be removed without remembering names.

use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
};
use kube::discovery::ApiResource;
use snafu::{OptionExt, ResultExt, Snafu};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const FIELD_MANAGER: &str = "neutree";
pub const CLUSTER_LABEL: &str = "cluster";
pub const WORKSPACE_LABEL: &str = "workspace";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "neutree.ai";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("object '{}' has no apiVersion/kind", name))]
    MissingTypeMeta { name: String },

    #[snafu(display("object of kind '{}' has no name", kind))]
    MissingName { kind: String },

    #[snafu(display("apply {} '{}' rejected: {}", kind, name, source))]
    Apply {
        kind: String,
        name: String,
        source: kube::Error,
    },

    #[snafu(display("Kubernetes API error: {}", source))]
    Kube { source: kube::Error },
}

impl Error {
    pub fn is_apply_rejected(&self) -> bool {
        matches!(self, Error::Apply { .. })
    }
}

/// Applies and deletes the objects of one owner (cluster + workspace) in
/// one namespace.
#[derive(Clone)]
pub struct KubernetesDeployer {
    client: kube::Client,
    namespace: String,
    cluster: String,
    workspace: String,
}

impl KubernetesDeployer {
    pub fn new(client: kube::Client, namespace: &str, cluster: &str, workspace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_owned(),
            cluster: cluster.to_owned(),
            workspace: workspace.to_owned(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        owner_labels(&self.cluster, &self.workspace)
    }

    pub fn label_selector(&self) -> String {
        selector(&self.labels())
    }

    fn api(&self, gvk: &GroupVersionKind) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            &self.namespace,
            &ApiResource::from_gvk(gvk),
        )
    }

    /// Server-side applies `objects` and returns how many actually changed.
    pub async fn apply(&self, objects: Vec<DynamicObject>) -> Result<usize, Error> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let mut changed_count = 0;

        for mut object in objects {
            stamp(&mut object, &self.namespace, &self.labels());
            let gvk = gvk_of(&object)?;
            let name = object.metadata.name.clone().context(MissingNameSnafu {
                kind: gvk.kind.clone(),
            })?;
            let api = self.api(&gvk);

            let before = api.get_opt(&name).await.context(KubeSnafu)?;
            let after = api
                .patch(&name, &params, &Patch::Apply(&object))
                .await
                .context(ApplySnafu {
                    kind: gvk.kind.clone(),
                    name: name.clone(),
                })?;

            if changed(before.as_ref(), &after) {
                debug!(
                    kind = %gvk.kind,
                    name = %name,
                    namespace = %self.namespace,
                    "object changed"
                );
                changed_count += 1;
            }
        }

        Ok(changed_count)
    }

    /// Deletes every owned object of the kinds in `objects`. Returns `true`
    /// once none remain; not-found counts as gone.
    pub async fn delete(&self, objects: &[DynamicObject]) -> Result<bool, Error> {
        let mut kinds = BTreeSet::new();
        for object in objects {
            let gvk = gvk_of(object)?;
            kinds.insert((gvk.group, gvk.version, gvk.kind));
        }

        let selector = self.label_selector();
        let list_params = ListParams::default().labels(&selector);
        let mut remaining = 0;

        for (group, version, kind) in kinds {
            let gvk = GroupVersionKind::gvk(&group, &version, &kind);
            let api = self.api(&gvk);
            let existing = api.list(&list_params).await.context(KubeSnafu)?;

            for object in existing.items {
                let Some(name) = object.metadata.name else {
                    continue;
                };
                remaining += 1;
                match api.delete(&name, &DeleteParams::background()).await {
                    Ok(_) => {
                        info!(kind = %kind, name = %name, namespace = %self.namespace, "deleting object")
                    }
                    Err(kube::Error::Api(ae)) if ae.code == 404 => remaining -= 1,
                    Err(source) => return Err(Error::Kube { source }),
                }
            }
        }

        Ok(remaining == 0)
    }
}

pub fn owner_labels(cluster: &str, workspace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_LABEL.to_owned(), cluster.to_owned()),
        (WORKSPACE_LABEL.to_owned(), workspace.to_owned()),
        (MANAGED_BY_LABEL.to_owned(), MANAGED_BY.to_owned()),
    ])
}

pub fn selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Sets the namespace and merges the ownership labels into the object's own.
pub fn stamp(object: &mut DynamicObject, namespace: &str, labels: &BTreeMap<String, String>) {
    object.metadata.namespace = Some(namespace.to_owned());
    object
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}

pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind, Error> {
    let types = object.types.as_ref().context(MissingTypeMetaSnafu {
        name: object.metadata.name.clone().unwrap_or_default(),
    })?;

    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// An apply changed the object when it was created or its resourceVersion moved.
pub fn changed(before: Option<&DynamicObject>, after: &DynamicObject) -> bool {
    match before {
        None => true,
        Some(before) => before.metadata.resource_version != after.metadata.resource_version,
    }
}

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

//! Kind, table and type registry for rows of the object store.
//!
//! Every stored kind is a variant of [`Kind`]; the mapping to table names and
//! to the typed objects in [`crate::types::v1`] is an exhaustive match, so
//! adding a kind fails to compile until every table is updated.

use crate::types;
use crate::types::error::{KindMismatchSnafu, UnknownKindSnafu};
use crate::types::v1::access::{ApiKey, Role, RoleAssignment, Workspace};
use crate::types::v1::cluster::Cluster;
use crate::types::v1::endpoint::Endpoint;
use crate::types::v1::engine::Engine;
use crate::types::v1::metadata::Metadata;
use crate::types::v1::registry::{ImageRegistry, ModelRegistry};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::warn;

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter,
)]
pub enum Kind {
    Cluster,
    Engine,
    ModelRegistry,
    ImageRegistry,
    Endpoint,
    ApiKey,
    Workspace,
    Role,
    RoleAssignment,
}

impl Kind {
    pub fn table(&self) -> &'static str {
        match self {
            Kind::Cluster => "clusters",
            Kind::Engine => "engines",
            Kind::ModelRegistry => "model_registries",
            Kind::ImageRegistry => "image_registries",
            Kind::Endpoint => "endpoints",
            Kind::ApiKey => "api_keys",
            Kind::Workspace => "workspaces",
            Kind::Role => "roles",
            Kind::RoleAssignment => "role_assignments",
        }
    }

    /// Whether rows of this kind are scoped to a workspace.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Kind::Workspace | Kind::Role)
    }

    pub fn from_table(table: &str) -> Option<Kind> {
        Kind::iter().find(|k| k.table() == table)
    }
}

/// Resolves a kind name, case-insensitively, also accepting the table name
/// (`clusters`, `role_assignments`).
pub fn resolve_kind(name: &str) -> Result<Kind, types::error::Error> {
    let wanted = name.trim().to_ascii_lowercase();
    let squashed = wanted.replace(['_', '-'], "");

    Kind::iter()
        .find(|k| {
            let kind = k.to_string().to_ascii_lowercase();
            kind == squashed || k.table() == wanted || k.table().replace('_', "") == squashed
        })
        .ok_or_else(|| UnknownKindSnafu { kind: name }.build())
}

/// A typed row of any stored kind.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyObject {
    Cluster(Cluster),
    Engine(Engine),
    ModelRegistry(ModelRegistry),
    ImageRegistry(ImageRegistry),
    Endpoint(Endpoint),
    ApiKey(ApiKey),
    Workspace(Workspace),
    Role(Role),
    RoleAssignment(RoleAssignment),
}

macro_rules! dispatch {
    ($value:expr, $obj:ident => $body:expr) => {
        match $value {
            AnyObject::Cluster($obj) => $body,
            AnyObject::Engine($obj) => $body,
            AnyObject::ModelRegistry($obj) => $body,
            AnyObject::ImageRegistry($obj) => $body,
            AnyObject::Endpoint($obj) => $body,
            AnyObject::ApiKey($obj) => $body,
            AnyObject::Workspace($obj) => $body,
            AnyObject::Role($obj) => $body,
            AnyObject::RoleAssignment($obj) => $body,
        }
    };
}

impl AnyObject {
    /// An empty object of `kind`, with `api_version` and `kind` filled in.
    pub fn new(kind: Kind) -> Self {
        let mut object = match kind {
            Kind::Cluster => AnyObject::Cluster(Default::default()),
            Kind::Engine => AnyObject::Engine(Default::default()),
            Kind::ModelRegistry => AnyObject::ModelRegistry(Default::default()),
            Kind::ImageRegistry => AnyObject::ImageRegistry(Default::default()),
            Kind::Endpoint => AnyObject::Endpoint(Default::default()),
            Kind::ApiKey => AnyObject::ApiKey(Default::default()),
            Kind::Workspace => AnyObject::Workspace(Default::default()),
            Kind::Role => AnyObject::Role(Default::default()),
            Kind::RoleAssignment => AnyObject::RoleAssignment(Default::default()),
        };
        dispatch!(&mut object, o => {
            o.api_version = types::v1::API_VERSION.to_owned();
            o.kind = kind.to_string();
        });
        object
    }

    /// Decodes a row as `kind`. A row naming a different kind is rejected.
    pub fn from_value(kind: Kind, value: serde_json::Value) -> Result<Self, types::error::Error> {
        if let Some(actual) = value.get("kind").and_then(|k| k.as_str())
            && !actual.is_empty()
            && resolve_kind(actual).ok() != Some(kind)
        {
            return KindMismatchSnafu {
                expected: kind.to_string(),
                actual,
            }
            .fail();
        }

        let mut object = match kind {
            Kind::Cluster => AnyObject::Cluster(serde_json::from_value(value)?),
            Kind::Engine => AnyObject::Engine(serde_json::from_value(value)?),
            Kind::ModelRegistry => AnyObject::ModelRegistry(serde_json::from_value(value)?),
            Kind::ImageRegistry => AnyObject::ImageRegistry(serde_json::from_value(value)?),
            Kind::Endpoint => AnyObject::Endpoint(serde_json::from_value(value)?),
            Kind::ApiKey => AnyObject::ApiKey(serde_json::from_value(value)?),
            Kind::Workspace => AnyObject::Workspace(serde_json::from_value(value)?),
            Kind::Role => AnyObject::Role(serde_json::from_value(value)?),
            Kind::RoleAssignment => AnyObject::RoleAssignment(serde_json::from_value(value)?),
        };
        dispatch!(&mut object, o => {
            if o.kind.is_empty() {
                o.kind = kind.to_string();
            }
        });
        Ok(object)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, types::error::Error> {
        Ok(dispatch!(self, o => serde_json::to_value(o)?))
    }

    pub fn kind(&self) -> Kind {
        match self {
            AnyObject::Cluster(_) => Kind::Cluster,
            AnyObject::Engine(_) => Kind::Engine,
            AnyObject::ModelRegistry(_) => Kind::ModelRegistry,
            AnyObject::ImageRegistry(_) => Kind::ImageRegistry,
            AnyObject::Endpoint(_) => Kind::Endpoint,
            AnyObject::ApiKey(_) => Kind::ApiKey,
            AnyObject::Workspace(_) => Kind::Workspace,
            AnyObject::Role(_) => Kind::Role,
            AnyObject::RoleAssignment(_) => Kind::RoleAssignment,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        dispatch!(self, o => &o.metadata)
    }

    pub fn id(&self) -> Option<i64> {
        dispatch!(self, o => o.id)
    }
}

/// Rows of one kind.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectList {
    pub kind: Kind,
    pub items: Vec<AnyObject>,
}

impl ObjectList {
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    /// Decodes rows of `kind`. Rows that do not decode are skipped so one
    /// malformed row cannot hide the rest of the table.
    pub fn from_values(kind: Kind, rows: Vec<serde_json::Value>) -> Self {
        let items = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").cloned();
                AnyObject::from_value(kind, row)
                    .inspect_err(|e| warn!(%kind, ?id, error = %e, "skipping undecodable row"))
                    .ok()
            })
            .collect();
        Self { kind, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Typed objects that know their kind.
pub trait Typed: Sized {
    const KIND: Kind;

    fn from_any(object: AnyObject) -> Option<Self>;
}

macro_rules! typed {
    ($($ty:ident),* $(,)?) => {
        $(
            impl Typed for $ty {
                const KIND: Kind = Kind::$ty;

                fn from_any(object: AnyObject) -> Option<Self> {
                    match object {
                        AnyObject::$ty(o) => Some(o),
                        _ => None,
                    }
                }
            }
        )*
    };
}

typed!(
    Cluster,
    Engine,
    ModelRegistry,
    ImageRegistry,
    Endpoint,
    ApiKey,
    Workspace,
    Role,
    RoleAssignment,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_bijection() {
        for kind in Kind::iter() {
            assert_eq!(Kind::from_table(kind.table()), Some(kind));
        }
        assert_eq!(Kind::iter().count(), 9);
    }

    #[test]
    fn test_resolve_kind() {
        assert_eq!(resolve_kind("Cluster").ok(), Some(Kind::Cluster));
        assert_eq!(resolve_kind("cluster").ok(), Some(Kind::Cluster));
        assert_eq!(resolve_kind("clusters").ok(), Some(Kind::Cluster));
        assert_eq!(resolve_kind("IMAGEREGISTRY").ok(), Some(Kind::ImageRegistry));
        assert_eq!(resolve_kind("image_registries").ok(), Some(Kind::ImageRegistry));
        assert_eq!(resolve_kind("role_assignment").ok(), Some(Kind::RoleAssignment));
        assert_eq!(resolve_kind("ApiKeys").ok(), Some(Kind::ApiKey));

        let err = resolve_kind("gateway").expect_err("unknown kind");
        assert!(err.to_string().contains("gateway"));
    }

    #[test]
    fn test_new_sets_type_meta() {
        for kind in Kind::iter() {
            let object = AnyObject::new(kind);
            assert_eq!(object.kind(), kind);
            let value = object.to_value().expect("serialize");
            assert_eq!(value["api_version"], "v1");
            assert_eq!(value["kind"], kind.to_string());
        }
    }

    #[test]
    fn test_from_value() {
        let row = json!({
            "id": 3,
            "metadata": {"name": "hub", "workspace": "default"},
            "spec": {"url": "https://registry.example.com", "repository": "neutree"}
        });
        let object = AnyObject::from_value(Kind::ImageRegistry, row).expect("decode");
        assert_eq!(object.kind(), Kind::ImageRegistry);
        assert_eq!(object.id(), Some(3));
        assert_eq!(object.metadata().workspace_name(), "default/hub");

        let registry = ImageRegistry::from_any(object).expect("typed");
        assert_eq!(registry.kind, "ImageRegistry");
        assert_eq!(
            registry.image_prefix().ok(),
            Some("registry.example.com/neutree".to_string())
        );
    }

    #[test]
    fn test_from_value_kind_mismatch() {
        let row = json!({
            "kind": "Engine",
            "metadata": {"name": "vllm"},
            "spec": {}
        });
        let err = AnyObject::from_value(Kind::Cluster, row).expect_err("mismatch");
        assert!(matches!(err, types::error::Error::KindMismatch { .. }));
    }

    #[test]
    fn test_object_list() {
        let rows = vec![
            json!({
                "metadata": {"name": "a", "workspace": "default"},
                "spec": {"type": "kubernetes"}
            }),
            json!({"metadata": {"name": "b", "workspace": "default"}, "spec": {}}),
        ];
        let list = ObjectList::from_values(Kind::Cluster, rows);
        assert_eq!(list.len(), 2);
        assert!(list.items.iter().all(|o| o.kind() == Kind::Cluster));
        assert!(ObjectList::new(Kind::Role).is_empty());
    }

    #[test]
    fn test_object_list_skips_undecodable_rows() {
        let rows = vec![
            json!({
                "id": 1,
                "metadata": {"name": "a", "workspace": "default"},
                "spec": {"type": "kubernetes"}
            }),
            json!({
                "id": 2,
                "metadata": {"name": "b", "workspace": "default"},
                "spec": {"type": "kubernetes"},
                "status": {"phase": "Updating"}
            }),
            json!({
                "id": 3,
                "metadata": {"name": "c", "workspace": "default"},
                "spec": {"type": "mainframe"}
            }),
            json!({"id": 4, "kind": "Engine", "metadata": {"name": "d"}, "spec": {}}),
        ];
        let list = ObjectList::from_values(Kind::Cluster, rows);
        let names: Vec<&str> = list.items.iter().map(|o| o.metadata().name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}

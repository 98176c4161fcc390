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

//! Workspaces, roles, and API keys. These are plain rows for the object
//! store; the gateway enforces them.

use super::object::{CommonStatus, Object};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Workspace = Object<WorkspaceSpec, CommonStatus>;
pub type Role = Object<RoleSpec, CommonStatus>;
pub type RoleAssignment = Object<RoleAssignmentSpec, CommonStatus>;
pub type ApiKey = Object<ApiKeySpec, ApiKeyStatus>;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct WorkspaceSpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RoleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset_key: Option<String>,

    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct RoleAssignmentSpec {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace: String,

    #[serde(default)]
    pub global: bool,

    pub role: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ApiKeySpec {
    #[serde(default)]
    pub quota: i64,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ApiKeyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sk_value: Option<String>,

    #[serde(default)]
    pub usage: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

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

//! Client for the REST gateway in front of the object tables.
//!
//! The gateway speaks PostgREST: one path per table, filters as
//! `column=op.value` query parameters, JSON path columns such as
//! `metadata->>name`.

use crate::scheme::{AnyObject, Kind, ObjectList, Typed};
use crate::types;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use snafu::{ResultExt, Snafu};
use std::fmt;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("invalid storage url '{}'", url))]
    InvalidUrl { url: String },

    #[snafu(display("failed to build storage client: {}", source))]
    Client { source: reqwest::Error },

    #[snafu(display("storage request to {} failed: {}", table, source))]
    Request { table: String, source: reqwest::Error },

    #[snafu(display("storage request to {} returned {}: {}", table, status, message))]
    Status {
        table: String,
        status: u16,
        message: String,
    },

    #[snafu(display("{} '{}' not found", kind, name))]
    NotFound { kind: Kind, name: String },

    #[snafu(transparent)]
    Types { source: types::error::Error },
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
            || matches!(
                self,
                Error::Status { status, .. } if *status == StatusCode::NOT_FOUND.as_u16()
            )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Request { source, .. } => source.is_timeout() || source.is_connect(),
            Error::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// One PostgREST filter, `column=op.value`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub operator: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: &str) -> Self {
        Self {
            column: column.to_owned(),
            operator: "eq".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn name(name: &str) -> Self {
        Self::eq("metadata->>name", name)
    }

    pub fn workspace(workspace: &str) -> Self {
        Self::eq("metadata->>workspace", workspace)
    }

    pub fn query_pair(&self) -> (String, String) {
        (self.column.clone(), format!("{}.{}", self.operator, self.value))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}.{}", self.column, self.operator, self.value)
    }
}

/// Filters selecting exactly one object by name, and workspace when the kind
/// is workspace scoped.
pub fn identity_filters(kind: Kind, name: &str, workspace: &str) -> Vec<Filter> {
    let mut filters = vec![Filter::name(name)];
    if kind.is_namespaced() && !workspace.is_empty() {
        filters.push(Filter::workspace(workspace));
    }
    filters
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list(&self, kind: Kind, filters: &[Filter]) -> Result<ObjectList, Error>;

    async fn get(&self, kind: Kind, name: &str, workspace: &str) -> Result<AnyObject, Error> {
        let list = self.list(kind, &identity_filters(kind, name, workspace)).await?;
        list.items.into_iter().next().ok_or_else(|| Error::NotFound {
            kind,
            name: name.to_owned(),
        })
    }

    async fn create(&self, object: &AnyObject) -> Result<AnyObject, Error>;

    async fn update(&self, object: &AnyObject) -> Result<AnyObject, Error>;

    async fn delete(&self, kind: Kind, name: &str, workspace: &str) -> Result<(), Error>;

    /// Replaces only the `status` column.
    async fn update_status(
        &self,
        kind: Kind,
        name: &str,
        workspace: &str,
        status: serde_json::Value,
    ) -> Result<(), Error>;
}

/// Lists and narrows to the typed object of `T`'s kind.
pub async fn list_typed<T: Typed>(
    storage: &dyn ObjectStorage,
    filters: &[Filter],
) -> Result<Vec<T>, Error> {
    let list = storage.list(T::KIND, filters).await?;
    Ok(list.items.into_iter().filter_map(T::from_any).collect())
}

pub async fn get_typed<T: Typed>(
    storage: &dyn ObjectStorage,
    name: &str,
    workspace: &str,
) -> Result<T, Error> {
    let object = storage.get(T::KIND, name, workspace).await?;
    T::from_any(object).ok_or_else(|| Error::NotFound {
        kind: T::KIND,
        name: name.to_owned(),
    })
}

/// [`ObjectStorage`] over the gateway's HTTP API.
#[derive(Clone, Debug)]
pub struct RestStorage {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl RestStorage {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, Error> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return InvalidUrlSnafu { url: base_url }.fail();
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context(ClientSnafu)?;

        Ok(Self {
            base_url: base_url.to_owned(),
            token: token.filter(|t| !t.is_empty()),
            client,
        })
    }

    pub fn table_url(&self, kind: Kind) -> String {
        format!("{}/{}", self.base_url, kind.table())
    }

    fn request(&self, method: Method, kind: Kind, filters: &[Filter]) -> RequestBuilder {
        let query: Vec<(String, String)> = filters.iter().map(Filter::query_pair).collect();
        let request = self
            .client
            .request(method, self.table_url(kind))
            .query(&query)
            .header("Prefer", "return=representation");

        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        kind: Kind,
        request: RequestBuilder,
    ) -> Result<Vec<serde_json::Value>, Error> {
        let table = kind.table();
        let response = request.send().await.context(RequestSnafu { table })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return StatusSnafu {
                table,
                status: status.as_u16(),
                message,
            }
            .fail();
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        response.json().await.context(RequestSnafu { table })
    }

    fn first(kind: Kind, name: &str, rows: Vec<serde_json::Value>) -> Result<AnyObject, Error> {
        match rows.into_iter().next() {
            Some(row) => Ok(AnyObject::from_value(kind, row)?),
            None => NotFoundSnafu { kind, name }.fail(),
        }
    }
}

#[async_trait]
impl ObjectStorage for RestStorage {
    async fn list(&self, kind: Kind, filters: &[Filter]) -> Result<ObjectList, Error> {
        debug!(table = kind.table(), filters = ?filters, "listing objects");
        let rows = self.send(kind, self.request(Method::GET, kind, filters)).await?;
        Ok(ObjectList::from_values(kind, rows))
    }

    async fn create(&self, object: &AnyObject) -> Result<AnyObject, Error> {
        let kind = object.kind();
        let mut body = object.to_value()?;
        if let Some(map) = body.as_object_mut() {
            map.remove("id");
        }

        let rows = self
            .send(kind, self.request(Method::POST, kind, &[]).json(&body))
            .await?;
        Self::first(kind, &object.metadata().name, rows)
    }

    async fn update(&self, object: &AnyObject) -> Result<AnyObject, Error> {
        let kind = object.kind();
        let metadata = object.metadata();
        let filters = identity_filters(kind, &metadata.name, &metadata.workspace);
        let body = object.to_value()?;

        let rows = self
            .send(kind, self.request(Method::PATCH, kind, &filters).json(&body))
            .await?;
        Self::first(kind, &metadata.name, rows)
    }

    async fn delete(&self, kind: Kind, name: &str, workspace: &str) -> Result<(), Error> {
        let filters = identity_filters(kind, name, workspace);
        self.send(kind, self.request(Method::DELETE, kind, &filters))
            .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        kind: Kind,
        name: &str,
        workspace: &str,
        status: serde_json::Value,
    ) -> Result<(), Error> {
        let filters = identity_filters(kind, name, workspace);
        let body = serde_json::json!({ "status": status });

        let rows = self
            .send(kind, self.request(Method::PATCH, kind, &filters).json(&body))
            .await?;
        if rows.is_empty() {
            return NotFoundSnafu { kind, name }.fail();
        }
        Ok(())
    }
}

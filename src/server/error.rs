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

use crate::plugin;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use snafu::Snafu;

/// Registration API errors
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Bad request: {}", message))]
    BadRequest { message: String },

    #[snafu(display("Plugin error: {}", source))]
    Plugin { source: plugin::Error },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message, details) = match &self {
            Error::BadRequest { message } => {
                (StatusCode::BAD_REQUEST, "BadRequest", message.clone(), None)
            }
            Error::Plugin { source } if source.is_validation() => (
                StatusCode::BAD_REQUEST,
                "BadRequest",
                "invalid plugin registration".to_string(),
                Some(source.to_string()),
            ),
            Error::Plugin { source } if source.is_not_found() => (
                StatusCode::NOT_FOUND,
                "NotFound",
                "plugin not found".to_string(),
                Some(source.to_string()),
            ),
            Error::Plugin { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PluginError",
                "plugin registration failed".to_string(),
                Some(source.to_string()),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

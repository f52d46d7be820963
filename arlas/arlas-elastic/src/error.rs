// Copyright 2024-Present Gisaïa
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

use arlas_common::{ServiceError, ServiceErrorCode};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub type ElasticResult<T> = Result<T, ElasticError>;

/// Classification of the failures of the search backend.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ElasticError {
    /// The index, alias, template, document or scroll does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend rejected the request, for instance a query it could not parse.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Any other backend or transport failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ElasticError {
    /// Translates a backend error response.
    pub fn from_status(status_code: StatusCode, reason: String) -> Self {
        match status_code {
            StatusCode::NOT_FOUND => ElasticError::NotFound(reason),
            StatusCode::BAD_REQUEST => ElasticError::BadRequest(reason),
            _ => ElasticError::Internal(format!("{reason} (status={status_code})")),
        }
    }
}

impl ServiceError for ElasticError {
    fn error_code(&self) -> ServiceErrorCode {
        match self {
            ElasticError::NotFound(_) => ServiceErrorCode::NotFound,
            ElasticError::BadRequest(_) => ServiceErrorCode::BadRequest,
            ElasticError::Internal(_) => ServiceErrorCode::Internal,
        }
    }
}

impl From<reqwest::Error> for ElasticError {
    fn from(error: reqwest::Error) -> Self {
        ElasticError::Internal(format!("transport error: {error}"))
    }
}

#[derive(Deserialize)]
struct ErrorResponsePayload {
    error: JsonValue,
}

/// Extracts the human readable reason out of an error response body. Falls back on the raw body.
pub(crate) fn parse_error_reason(body: &str) -> String {
    let error_opt = serde_json::from_str::<ErrorResponsePayload>(body)
        .ok()
        .map(|payload| payload.error);
    match error_opt {
        Some(JsonValue::String(reason)) => reason,
        Some(JsonValue::Object(error)) => {
            let reason_opt = error.get("reason").and_then(JsonValue::as_str);
            let type_opt = error.get("type").and_then(JsonValue::as_str);
            match (type_opt, reason_opt) {
                (Some(error_type), Some(reason)) => format!("{error_type}: {reason}"),
                (None, Some(reason)) => reason.to_string(),
                _ => JsonValue::Object(error).to_string(),
            }
        }
        _ if body.is_empty() => "no reason given".to_string(),
        _ => body.to_string(),
    }
}

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

use arlas_cache::CacheError;
use arlas_common::{ServiceError, ServiceErrorCode};
use arlas_elastic::ElasticError;
use thiserror::Error;

pub type CollectionResult<T> = Result<T, CollectionError>;

/// Errors returned by the collection services.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum CollectionError {
    /// The collection, its index or one of its documents does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The collection exists but none of its fields can be described, usually because its
    /// index is gone.
    #[error("collection `{0}` cannot be described")]
    NotDescribable(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError for CollectionError {
    fn error_code(&self) -> ServiceErrorCode {
        match self {
            CollectionError::NotFound(_) => ServiceErrorCode::NotFound,
            CollectionError::InvalidParameter(_) | CollectionError::BadRequest(_) => {
                ServiceErrorCode::BadRequest
            }
            CollectionError::NotDescribable(_) | CollectionError::Internal(_) => {
                ServiceErrorCode::Internal
            }
        }
    }
}

impl From<ElasticError> for CollectionError {
    fn from(error: ElasticError) -> Self {
        match error {
            ElasticError::NotFound(message) => CollectionError::NotFound(message),
            ElasticError::BadRequest(message) => CollectionError::BadRequest(message),
            ElasticError::Internal(message) => CollectionError::Internal(message),
        }
    }
}

impl From<CacheError> for CollectionError {
    fn from(error: CacheError) -> Self {
        CollectionError::Internal(error.to_string())
    }
}

impl From<serde_json::Error> for CollectionError {
    fn from(error: serde_json::Error) -> Self {
        CollectionError::Internal(format!("malformed collection document: {error}"))
    }
}

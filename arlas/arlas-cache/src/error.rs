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

use arlas_common::retry::Retryable;
use arlas_common::{ServiceError, ServiceErrorCode};
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum CacheError {
    /// The cache store is no longer a member of its cluster.
    #[error("cache cluster membership lost: {0}")]
    MembershipLost(String),

    #[error("failed to join cache cluster: {0}")]
    Join(String),

    #[error("failed to (de)serialize cache entry: {0}")]
    Serde(String),

    #[error("internal cache error: {0}")]
    Internal(String),
}

impl Retryable for CacheError {
    fn is_retryable(&self) -> bool {
        matches!(self, CacheError::MembershipLost(_))
    }
}

impl ServiceError for CacheError {
    fn error_code(&self) -> ServiceErrorCode {
        match self {
            CacheError::MembershipLost(_) | CacheError::Join(_) => ServiceErrorCode::Unavailable,
            CacheError::Serde(_) | CacheError::Internal(_) => ServiceErrorCode::Internal,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::Serde(error.to_string())
    }
}

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

use std::convert::Infallible;

/// Maps service errors to the HTTP status the REST layer answers with.
///
/// It is voluntarily a restricted subset.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ServiceErrorCode {
    BadRequest,
    Internal,
    NotFound,
    Unavailable,
}

impl ServiceErrorCode {
    pub fn to_http_status_code(self) -> http::StatusCode {
        match self {
            ServiceErrorCode::BadRequest => http::StatusCode::BAD_REQUEST,
            ServiceErrorCode::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            ServiceErrorCode::NotFound => http::StatusCode::NOT_FOUND,
            ServiceErrorCode::Unavailable => http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub trait ServiceError: ToString {
    fn error_code(&self) -> ServiceErrorCode;
}

impl ServiceError for Infallible {
    fn error_code(&self) -> ServiceErrorCode {
        unreachable!()
    }
}

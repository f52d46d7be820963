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

pub mod glob;
pub mod retry;
mod service_error;
#[cfg(any(test, feature = "testsuite"))]
pub mod test_utils;

pub use service_error::{ServiceError, ServiceErrorCode};
use tracing_subscriber::EnvFilter;

/// Installs a compact `tracing` subscriber writing to the test harness output.
///
/// The log level can be tuned with `RUST_LOG`. Calling this function several times is harmless.
pub fn setup_logging_for_tests() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arlas=debug,info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .compact()
        .try_init();
}

/// Splits a comma-separated list, trimming whitespace and dropping empty items.
pub fn split_comma_separated(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

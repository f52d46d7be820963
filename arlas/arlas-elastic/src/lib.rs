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

//! Client of the Elasticsearch cluster holding the collection metadata index and the data
//! indices the collections point to.

mod error;
mod http_client;
#[cfg(any(test, feature = "testsuite"))]
mod in_memory_client;
mod models;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

pub use self::error::{ElasticError, ElasticResult};
pub use self::http_client::HttpElasticClient;
#[cfg(any(test, feature = "testsuite"))]
pub use self::in_memory_client::{ElasticOp, InMemoryElasticClient};
pub use self::models::{Hit, IndexMappings, ScrollPage, SearchRequest};

/// Operations of the search backend consumed by the collection services.
#[async_trait]
pub trait ElasticClient: Send + Sync + 'static {
    async fn index_exists(&self, index: &str) -> ElasticResult<bool>;

    /// Creates `index` with the settings and mappings of `body`.
    async fn create_index(&self, index: &str, body: &JsonValue) -> ElasticResult<()>;

    /// Returns the mappings of the indices matched by `index_opt`, or of every index when
    /// `index_opt` is `None`.
    ///
    /// When a named index has no mapping, falls back on the index templates whose pattern
    /// matches the name. Those mappings are keyed by template name.
    async fn get_mappings(&self, index_opt: Option<&str>) -> ElasticResult<IndexMappings>;

    /// Returns the source of the document, `None` if it does not exist.
    async fn get_document(&self, index: &str, id: &str) -> ElasticResult<Option<JsonValue>>;

    /// Creates or replaces a document. The write is visible to searches on return.
    async fn index_document(&self, index: &str, id: &str, document: &JsonValue)
        -> ElasticResult<()>;

    /// Deletes a document, failing with [`ElasticError::NotFound`] if it does not exist.
    async fn delete_document(&self, index: &str, id: &str) -> ElasticResult<()>;

    /// Opens a scroll over all the documents of `index` and returns its first page.
    async fn search(&self, index: &str, search_request: &SearchRequest)
        -> ElasticResult<ScrollPage>;

    /// Returns the next page of a scroll.
    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> ElasticResult<ScrollPage>;

    /// Releases a scroll cursor. Clearing an unknown cursor succeeds.
    async fn clear_scroll(&self, scroll_id: &str) -> ElasticResult<()>;
}

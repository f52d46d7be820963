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

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Mappings keyed by index name, or by index template name when they come from a template.
///
/// The `BTreeMap` keeps the indices sorted, so walking the mappings is deterministic.
pub type IndexMappings = BTreeMap<String, JsonValue>;

/// Scrolls over all the documents of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRequest {
    /// Number of documents per page.
    pub size: usize,
    /// How long the backend keeps the scroll cursor alive between two pages.
    pub keep_alive: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: JsonValue,
}

/// One page of a scroll. An empty page means the scroll is exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub hits: Vec<Hit>,
}

/// Formats a keep-alive the way the backend expects time units.
pub(crate) fn keep_alive_str(keep_alive: Duration) -> String {
    format!("{}ms", keep_alive.as_millis().max(1))
}

/// Returns true if the index template pattern matches `index_name`. Only exact patterns and
/// patterns ending with a wildcard are supported.
pub(crate) fn template_pattern_matches(pattern: &str, index_name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) if !prefix.contains('*') => index_name.starts_with(prefix),
        Some(_) => false,
        None => pattern == index_name,
    }
}

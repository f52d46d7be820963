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

//! Column filters restrict the collections and fields a caller can see.
//!
//! A filter is a comma-separated list of `collection_pattern:field_pattern` entries, for instance
//! `geodata*:*,other:params.*,fullname`. An entry without `:` applies to every collection.

use arlas_common::glob::{glob_match, GlobMatcher};

use crate::{CollectionError, CollectionResult};

#[derive(Debug, Clone, Eq, PartialEq)]
struct ColumnFilterEntry {
    collection_pattern: String,
    field_pattern: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnFilter {
    entries: Vec<ColumnFilterEntry>,
}

impl ColumnFilter {
    pub fn parse(column_filter: &str) -> CollectionResult<ColumnFilter> {
        let mut entries = Vec::new();

        for entry in column_filter.split(',').map(str::trim) {
            if entry.is_empty() {
                return Err(CollectionError::InvalidParameter(format!(
                    "column filter `{column_filter}` contains an empty entry"
                )));
            }
            let (collection_pattern, field_pattern) = match entry.split_once(':') {
                Some((collection_pattern, field_pattern)) => {
                    (collection_pattern.trim(), field_pattern.trim())
                }
                None => ("*", entry),
            };
            if collection_pattern.is_empty() || field_pattern.is_empty() {
                return Err(CollectionError::InvalidParameter(format!(
                    "invalid column filter entry `{entry}`: expected \
                     `collection_pattern:field_pattern`"
                )));
            }
            entries.push(ColumnFilterEntry {
                collection_pattern: collection_pattern.to_string(),
                field_pattern: field_pattern.to_string(),
            });
        }
        Ok(ColumnFilter { entries })
    }

    /// Returns true if some entry of the filter applies to `collection_name`.
    pub fn is_collection_visible(&self, collection_name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| glob_match(&entry.collection_pattern, collection_name))
    }

    /// Builds the field filter applying to `collection_name`.
    pub fn field_filter(&self, collection_name: &str) -> CollectionResult<FieldFilter> {
        let field_patterns: Vec<&str> = self
            .entries
            .iter()
            .filter(|entry| glob_match(&entry.collection_pattern, collection_name))
            .map(|entry| entry.field_pattern.as_str())
            .collect();
        let matcher = GlobMatcher::try_from_patterns(&field_patterns).map_err(|error| {
            CollectionError::InvalidParameter(format!("invalid column filter: {error}"))
        })?;
        Ok(FieldFilter {
            matcher_opt: Some(matcher),
        })
    }
}

/// Field paths visible to a caller within one collection.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    matcher_opt: Option<GlobMatcher>,
}

impl FieldFilter {
    pub fn allow_all() -> FieldFilter {
        FieldFilter { matcher_opt: None }
    }

    /// Builds the field filter of `collection_name`, allowing everything when there is no column
    /// filter.
    pub fn for_collection(
        column_filter_opt: Option<&ColumnFilter>,
        collection_name: &str,
    ) -> CollectionResult<FieldFilter> {
        match column_filter_opt {
            Some(column_filter) => column_filter.field_filter(collection_name),
            None => Ok(FieldFilter::allow_all()),
        }
    }

    /// Returns true if `field_path` matches a pattern or lies under an object path matching
    /// a pattern.
    pub fn is_allowed(&self, field_path: &str) -> bool {
        let Some(matcher) = &self.matcher_opt else {
            return true;
        };
        if matcher.is_match(field_path) {
            return true;
        }
        field_path
            .match_indices('.')
            .any(|(dot_pos, _)| matcher.is_match(&field_path[..dot_pos]))
    }
}

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

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arlas_common::glob::glob_match;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;

use crate::models::template_pattern_matches;
use crate::{
    ElasticClient, ElasticError, ElasticResult, Hit, IndexMappings, ScrollPage, SearchRequest,
};

/// Operations of [`ElasticClient`], used to target injected faults.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ElasticOp {
    IndexExists,
    CreateIndex,
    GetMappings,
    GetDocument,
    IndexDocument,
    DeleteDocument,
    Search,
    Scroll,
    ClearScroll,
}

struct IndexTemplate {
    index_patterns: Vec<String>,
    mappings: JsonValue,
}

struct OpenScroll {
    page_size: usize,
    remaining_hits: VecDeque<Hit>,
}

#[derive(Default)]
struct InMemoryState {
    indices: BTreeMap<String, JsonValue>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    index_templates: BTreeMap<String, IndexTemplate>,
    documents: HashMap<String, BTreeMap<String, JsonValue>>,
    scrolls: HashMap<String, OpenScroll>,
    scroll_counter: usize,
    faults: Vec<(ElasticOp, ElasticError)>,
    num_document_reads: usize,
    num_mapping_reads: usize,
}

impl InMemoryState {
    fn take_fault(&mut self, op: ElasticOp) -> ElasticResult<()> {
        if let Some(position) = self.faults.iter().position(|(fault_op, _)| *fault_op == op) {
            let (_, error) = self.faults.remove(position);
            return Err(error);
        }
        Ok(())
    }

    /// Resolves a comma-separated list of index names, aliases and wildcard patterns. Like the
    /// backend, a concrete name matching nothing is an error and a pattern matching nothing
    /// is not.
    fn resolve_indices(&self, expression: &str) -> ElasticResult<BTreeSet<String>> {
        let mut indices = BTreeSet::new();

        for part in expression.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            if part.contains('*') {
                indices.extend(
                    self.indices
                        .keys()
                        .filter(|index| glob_match(part, index))
                        .cloned(),
                );
                for (alias, alias_indices) in &self.aliases {
                    if glob_match(part, alias) {
                        indices.extend(alias_indices.iter().cloned());
                    }
                }
            } else if let Some(alias_indices) = self.aliases.get(part) {
                indices.extend(alias_indices.iter().cloned());
            } else if self.indices.contains_key(part) {
                indices.insert(part.to_string());
            } else {
                return Err(index_not_found(part));
            }
        }
        Ok(indices)
    }

    fn next_page(&mut self, scroll_id: &str) -> ElasticResult<ScrollPage> {
        let open_scroll = self.scrolls.get_mut(scroll_id).ok_or_else(|| {
            ElasticError::NotFound(format!(
                "search_context_missing_exception: no search context found for id [{scroll_id}]"
            ))
        })?;
        let num_hits = open_scroll.page_size.min(open_scroll.remaining_hits.len());
        let hits = open_scroll.remaining_hits.drain(..num_hits).collect();
        Ok(ScrollPage {
            scroll_id: Some(scroll_id.to_string()),
            hits,
        })
    }
}

fn index_not_found(index: &str) -> ElasticError {
    ElasticError::NotFound(format!(
        "index_not_found_exception: no such index [{index}]"
    ))
}

/// In-memory implementation of the backend holding indices, aliases, index templates,
/// documents and scroll cursors.
///
/// This implementation is mostly useful in unit tests.
#[derive(Clone, Default)]
pub struct InMemoryElasticClient {
    state: Arc<Mutex<InMemoryState>>,
}

impl fmt::Debug for InMemoryElasticClient {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.debug_struct("InMemoryElasticClient").finish()
    }
}

impl InMemoryElasticClient {
    /// Creates `index`, or replaces its mappings if it already exists. Documents are kept.
    pub async fn put_index(&self, index: &str, mappings: JsonValue) {
        self.state
            .lock()
            .await
            .indices
            .insert(index.to_string(), mappings);
    }

    /// Deletes `index` and its documents, and removes it from its aliases.
    pub async fn delete_index(&self, index: &str) {
        let mut state = self.state.lock().await;
        state.indices.remove(index);
        state.documents.remove(index);
        for alias_indices in state.aliases.values_mut() {
            alias_indices.remove(index);
        }
        state.aliases.retain(|_, alias_indices| !alias_indices.is_empty());
    }

    pub async fn put_alias(&self, alias: &str, indices: &[&str]) {
        let alias_indices = indices.iter().map(|index| index.to_string()).collect();
        self.state
            .lock()
            .await
            .aliases
            .insert(alias.to_string(), alias_indices);
    }

    pub async fn put_index_template(
        &self,
        template_name: &str,
        index_patterns: &[&str],
        mappings: JsonValue,
    ) {
        let index_template = IndexTemplate {
            index_patterns: index_patterns
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
            mappings,
        };
        self.state
            .lock()
            .await
            .index_templates
            .insert(template_name.to_string(), index_template);
    }

    /// Makes the next call to `op` fail with `error`.
    pub async fn fail_next(&self, op: ElasticOp, error: ElasticError) {
        self.state.lock().await.faults.push((op, error));
    }

    /// Number of `get_document` calls served so far.
    pub async fn num_document_reads(&self) -> usize {
        self.state.lock().await.num_document_reads
    }

    /// Number of `get_mappings` calls served so far.
    pub async fn num_mapping_reads(&self) -> usize {
        self.state.lock().await.num_mapping_reads
    }

    /// Number of scroll cursors opened and not cleared yet.
    pub async fn num_open_scrolls(&self) -> usize {
        self.state.lock().await.scrolls.len()
    }
}

#[async_trait]
impl ElasticClient for InMemoryElasticClient {
    async fn index_exists(&self, index: &str) -> ElasticResult<bool> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::IndexExists)?;
        Ok(state.indices.contains_key(index) || state.aliases.contains_key(index))
    }

    async fn create_index(&self, index: &str, body: &JsonValue) -> ElasticResult<()> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::CreateIndex)?;

        if state.indices.contains_key(index) {
            return Err(ElasticError::BadRequest(format!(
                "resource_already_exists_exception: index [{index}] already exists"
            )));
        }
        let mappings = body.get("mappings").cloned().unwrap_or_else(|| json!({}));
        state.indices.insert(index.to_string(), mappings);
        Ok(())
    }

    async fn get_mappings(&self, index_opt: Option<&str>) -> ElasticResult<IndexMappings> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::GetMappings)?;
        state.num_mapping_reads += 1;

        let Some(expression) = index_opt else {
            return Ok(state.indices.clone());
        };
        let not_found_error = match state.resolve_indices(expression) {
            Ok(indices) if !indices.is_empty() => {
                let mappings = indices
                    .into_iter()
                    .filter_map(|index| {
                        let mappings = state.indices.get(&index)?.clone();
                        Some((index, mappings))
                    })
                    .collect();
                return Ok(mappings);
            }
            Ok(_) => ElasticError::NotFound(format!("no mapping found for `{expression}`")),
            Err(error) => error,
        };
        let template_mappings: IndexMappings = state
            .index_templates
            .iter()
            .filter(|(_, index_template)| {
                index_template
                    .index_patterns
                    .iter()
                    .any(|pattern| template_pattern_matches(pattern, expression))
            })
            .map(|(template_name, index_template)| {
                (template_name.clone(), index_template.mappings.clone())
            })
            .collect();
        if template_mappings.is_empty() {
            return Err(not_found_error);
        }
        Ok(template_mappings)
    }

    async fn get_document(&self, index: &str, id: &str) -> ElasticResult<Option<JsonValue>> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::GetDocument)?;
        state.num_document_reads += 1;

        let document_opt = state
            .documents
            .get(index)
            .and_then(|documents| documents.get(id))
            .cloned();
        Ok(document_opt)
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        document: &JsonValue,
    ) -> ElasticResult<()> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::IndexDocument)?;

        state
            .indices
            .entry(index.to_string())
            .or_insert_with(|| json!({}));
        state
            .documents
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn delete_document(&self, index: &str, id: &str) -> ElasticResult<()> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::DeleteDocument)?;

        if !state.indices.contains_key(index) {
            return Err(index_not_found(index));
        }
        state
            .documents
            .get_mut(index)
            .and_then(|documents| documents.remove(id))
            .ok_or_else(|| ElasticError::NotFound(format!("document [{id}] not found")))?;
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        search_request: &SearchRequest,
    ) -> ElasticResult<ScrollPage> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::Search)?;

        let indices = state.resolve_indices(index)?;
        let mut remaining_hits: Vec<Hit> = indices
            .iter()
            .filter_map(|index| state.documents.get(index))
            .flat_map(|documents| documents.iter())
            .map(|(id, source)| Hit {
                id: id.clone(),
                source: source.clone(),
            })
            .collect();
        remaining_hits.sort_by(|left, right| left.id.cmp(&right.id));

        state.scroll_counter += 1;
        let scroll_id = format!("scroll-{}", state.scroll_counter);
        let open_scroll = OpenScroll {
            page_size: search_request.size.max(1),
            remaining_hits: remaining_hits.into(),
        };
        state.scrolls.insert(scroll_id.clone(), open_scroll);
        state.next_page(&scroll_id)
    }

    async fn scroll(&self, scroll_id: &str, _keep_alive: Duration) -> ElasticResult<ScrollPage> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::Scroll)?;
        state.next_page(scroll_id)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> ElasticResult<()> {
        let mut state = self.state.lock().await;
        state.take_fault(ElasticOp::ClearScroll)?;
        state.scrolls.remove(scroll_id);
        Ok(())
    }
}

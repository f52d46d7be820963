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

//! Builds the description of a collection from the mappings of its indices.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arlas_common::glob::GlobMatcher;
use arlas_elastic::{ElasticClient, IndexMappings};
use tracing::{debug, warn};

use crate::column_filter::{ColumnFilter, FieldFilter};
use crate::mapping::{MappingNode, MappingTree};
use crate::{
    CollectionCache, CollectionDescription, CollectionError, CollectionReference,
    CollectionReferenceParameters, CollectionResult, FieldDescription, MappingConflict,
};

/// Described fields keyed by field name.
type DescribedFields = BTreeMap<String, FieldDescription>;

struct WalkContext<'a> {
    exclude_matcher: &'a GlobMatcher,
    field_filter: &'a FieldFilter,
    taggable_paths: &'a HashSet<String>,
}

#[derive(Clone)]
pub struct CollectionDescriber {
    elastic_client: Arc<dyn ElasticClient>,
    collection_cache: CollectionCache,
}

impl CollectionDescriber {
    pub fn new(elastic_client: Arc<dyn ElasticClient>, collection_cache: CollectionCache) -> Self {
        Self {
            elastic_client,
            collection_cache,
        }
    }

    /// Returns the mappings of `index_name`, from the cache if possible.
    pub async fn get_mappings(&self, index_name: &str) -> CollectionResult<IndexMappings> {
        if let Some(mappings) = self.collection_cache.get_mappings(index_name).await? {
            return Ok(mappings);
        }
        debug!(index_name=%index_name, "mappings cache miss");
        let mappings = self.elastic_client.get_mappings(Some(index_name)).await?;
        self.collection_cache
            .put_mappings(index_name, &mappings)
            .await?;
        Ok(mappings)
    }

    /// Describes the fields of a collection visible through `column_filter_opt`.
    ///
    /// Fails with [`CollectionError::NotDescribable`] if no field is left, in particular when
    /// the index of the collection no longer exists.
    pub async fn describe(
        &self,
        collection: &CollectionReference,
        column_filter_opt: Option<&ColumnFilter>,
    ) -> CollectionResult<CollectionDescription> {
        let field_filter =
            FieldFilter::for_collection(column_filter_opt, &collection.collection_name)?;
        let mappings = match self.get_mappings(&collection.params.index_name).await {
            Ok(mappings) => mappings,
            Err(CollectionError::NotFound(reason)) => {
                debug!(
                    collection_name=%collection.collection_name,
                    index_name=%collection.params.index_name,
                    reason=%reason,
                    "collection index not found"
                );
                return Err(CollectionError::NotDescribable(
                    collection.collection_name.clone(),
                ));
            }
            Err(error) => return Err(error),
        };
        describe_mappings(
            &collection.collection_name,
            &collection.params,
            &mappings,
            &field_filter,
        )
    }
}

/// Walks the mappings of every index of the collection and unions the results.
///
/// Indices are visited in name order: when two indices disagree on the type of a field, the
/// type of the first one is kept and the conflict is reported in the description warnings.
pub fn describe_mappings(
    collection_name: &str,
    params: &CollectionReferenceParameters,
    mappings: &IndexMappings,
    field_filter: &FieldFilter,
) -> CollectionResult<CollectionDescription> {
    let exclude_matcher =
        GlobMatcher::try_from_patterns(&params.exclude_patterns()).map_err(|error| {
            CollectionError::InvalidParameter(format!("invalid `exclude_fields`: {error}"))
        })?;
    let taggable_paths: HashSet<String> = params.taggable_paths().into_iter().collect();
    let walk_context = WalkContext {
        exclude_matcher: &exclude_matcher,
        field_filter,
        taggable_paths: &taggable_paths,
    };
    let mut properties = DescribedFields::new();
    let mut field_origins: HashMap<String, String> = HashMap::new();
    let mut warnings = Vec::new();

    for (index_name, index_mappings) in mappings {
        let mapping_tree = MappingTree::parse(index_mappings)?;
        let mut field_path = String::new();
        let index_properties =
            describe_nodes(&mapping_tree.root, &mut field_path, true, &walk_context);
        let mut union = FieldUnion {
            collection_name,
            index_name,
            field_origins: &mut field_origins,
            warnings: &mut warnings,
        };
        union.merge(&mut properties, index_properties, "");
    }
    if properties.is_empty() {
        return Err(CollectionError::NotDescribable(collection_name.to_string()));
    }
    Ok(CollectionDescription {
        collection_name: collection_name.to_string(),
        params: params.clone(),
        properties,
        warnings,
    })
}

fn describe_nodes(
    nodes: &BTreeMap<String, MappingNode>,
    field_path: &mut String,
    parent_indexed: bool,
    walk_context: &WalkContext,
) -> DescribedFields {
    let mut described_fields = DescribedFields::new();

    for (field_name, node) in nodes {
        let parent_path_len = field_path.len();
        if !field_path.is_empty() {
            field_path.push('.');
        }
        field_path.push_str(field_name);

        if let Some(field_description) =
            describe_node(node, field_path, parent_indexed, walk_context)
        {
            described_fields.insert(field_name.clone(), field_description);
        }
        field_path.truncate(parent_path_len);
    }
    described_fields
}

fn describe_node(
    node: &MappingNode,
    field_path: &mut String,
    parent_indexed: bool,
    walk_context: &WalkContext,
) -> Option<FieldDescription> {
    if walk_context.exclude_matcher.is_match(field_path) {
        return None;
    }
    let indexed = parent_indexed && node.indexed();

    match node {
        MappingNode::Leaf(leaf) => {
            if !walk_context.field_filter.is_allowed(field_path) {
                return None;
            }
            Some(FieldDescription {
                field_type: leaf.field_type,
                indexed,
                format: leaf.format.clone(),
                taggable: walk_context.taggable_paths.contains(field_path.as_str()),
                properties: None,
            })
        }
        MappingNode::Object(object) => {
            let children = describe_nodes(&object.children, field_path, indexed, walk_context);
            if children.is_empty() {
                return None;
            }
            Some(FieldDescription {
                field_type: object.field_type,
                indexed,
                format: None,
                taggable: false,
                properties: Some(children),
            })
        }
    }
}

struct FieldUnion<'a> {
    collection_name: &'a str,
    index_name: &'a str,
    /// Index each kept field path comes from.
    field_origins: &'a mut HashMap<String, String>,
    warnings: &'a mut Vec<MappingConflict>,
}

impl FieldUnion<'_> {
    fn merge(&mut self, kept_fields: &mut DescribedFields, fields: DescribedFields, parent: &str) {
        for (field_name, field) in fields {
            let field_path = if parent.is_empty() {
                field_name.clone()
            } else {
                format!("{parent}.{field_name}")
            };
            let Some(kept_field) = kept_fields.get_mut(&field_name) else {
                self.record_origins(&field_path, &field);
                kept_fields.insert(field_name, field);
                continue;
            };
            if kept_field.field_type != field.field_type {
                let kept_index = self
                    .field_origins
                    .get(&field_path)
                    .cloned()
                    .unwrap_or_default();
                warn!(
                    collection_name=%self.collection_name,
                    field=%field_path,
                    kept_index=%kept_index,
                    kept_type=?kept_field.field_type,
                    ignored_index=%self.index_name,
                    ignored_type=?field.field_type,
                    "field type differs between indices of the collection"
                );
                self.warnings.push(MappingConflict {
                    field: field_path,
                    kept_index,
                    kept_type: kept_field.field_type,
                    ignored_index: self.index_name.to_string(),
                    ignored_type: field.field_type,
                });
                continue;
            }
            let Some(children) = field.properties else {
                continue;
            };
            let kept_children = kept_field.properties.get_or_insert_with(BTreeMap::new);
            self.merge(kept_children, children, &field_path);
        }
    }

    fn record_origins(&mut self, field_path: &str, field: &FieldDescription) {
        self.field_origins
            .insert(field_path.to_string(), self.index_name.to_string());
        for (child_name, child) in field.properties.iter().flatten() {
            self.record_origins(&format!("{field_path}.{child_name}"), child);
        }
    }
}

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

use std::sync::Arc;
use std::time::Duration;

use arlas_cache::{start_cache_store, CacheStore};
use arlas_common::glob::GlobMatcher;
use arlas_config::{ArlasConfig, ElasticConfig};
use arlas_elastic::{
    ElasticClient, ElasticError, HttpElasticClient, ScrollPage, SearchRequest,
};
use itertools::Itertools;
use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::column_filter::ColumnFilter;
use crate::mapping::{MappingNode, MappingTree};
use crate::{
    CollectionCache, CollectionDescriber, CollectionDescription, CollectionError,
    CollectionReference, CollectionReferenceParameters, CollectionResult, FieldType,
    TIMESTAMP_FORMAT_KEY,
};

/// Format of the timestamp field when its mapping does not declare one.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "strict_date_optional_time||epoch_millis";

const FORBIDDEN_COLLECTION_NAME_CHARS: &[char] = &['*', ',', ':', '/', '\\', '"', '#', '?'];

/// Settings and mappings of the collection index.
static COLLECTION_INDEX_BODY: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "mappings": {
            "dynamic": false,
            "properties": {
                "index_name": {"type": "keyword"},
                "id_path": {"type": "keyword"},
                "geometry_path": {"type": "keyword"},
                "centroid_path": {"type": "keyword"},
                "timestamp_path": {"type": "keyword"},
                "dublin_core_element_name": {
                    "properties": {
                        "title": {"type": "text"},
                        "description": {"type": "text"},
                        "subject": {"type": "keyword"},
                        "bbox": {"type": "geo_shape"}
                    }
                }
            }
        }
    })
});

/// Resolves, stores and describes collections.
///
/// Collection parameters are stored in the collection index, one document per collection, and
/// memoized in the cache along with the mappings of their indices and the types of their
/// fields. Every write invalidates the cache entries derived from the written collection.
pub struct CollectionResolver {
    collection_index: String,
    scroll_page_size: usize,
    scroll_keep_alive: Duration,
    elastic_client: Arc<dyn ElasticClient>,
    collection_cache: CollectionCache,
    describer: CollectionDescriber,
}

impl CollectionResolver {
    pub fn new(
        elastic_client: Arc<dyn ElasticClient>,
        cache_store: Arc<dyn CacheStore>,
        elastic_config: &ElasticConfig,
    ) -> Self {
        let collection_cache = CollectionCache::new(cache_store);
        let describer = CollectionDescriber::new(elastic_client.clone(), collection_cache.clone());
        Self {
            collection_index: elastic_config.collection_index.clone(),
            scroll_page_size: elastic_config.scroll_page_size,
            scroll_keep_alive: *elastic_config.scroll_keep_alive,
            elastic_client,
            collection_cache,
            describer,
        }
    }

    /// Connects to the backend and starts the cache store described by `config`.
    pub async fn from_config(config: &ArlasConfig) -> anyhow::Result<Self> {
        let elastic_client = HttpElasticClient::from_config(&config.elastic)?;
        let cache_store = start_cache_store(&config.cache).await?;
        Ok(Self::new(
            Arc::new(elastic_client),
            cache_store,
            &config.elastic,
        ))
    }

    pub fn collection_index(&self) -> &str {
        &self.collection_index
    }

    pub fn describer(&self) -> &CollectionDescriber {
        &self.describer
    }

    /// Creates the collection index if it does not exist. Returns true if it was created.
    pub async fn init_collection_index(&self) -> CollectionResult<bool> {
        if self
            .elastic_client
            .index_exists(&self.collection_index)
            .await?
        {
            return Ok(false);
        }
        match self
            .elastic_client
            .create_index(&self.collection_index, &COLLECTION_INDEX_BODY)
            .await
        {
            Ok(()) => {
                info!(collection_index=%self.collection_index, "created collection index");
                Ok(true)
            }
            // Another node created it in the meantime.
            Err(ElasticError::BadRequest(reason))
                if reason.contains("resource_already_exists_exception") =>
            {
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Returns the collection named `collection_name`.
    ///
    /// A collection hidden by the column filter, or whose fields cannot be described, is not
    /// found.
    pub async fn resolve_collection(
        &self,
        collection_name: &str,
        column_filter_opt: Option<&ColumnFilter>,
    ) -> CollectionResult<CollectionReference> {
        if let Some(column_filter) = column_filter_opt {
            if !column_filter.is_collection_visible(collection_name) {
                return Err(collection_not_found(collection_name));
            }
        }
        let params = match self.collection_cache.get_collection(collection_name).await? {
            Some(params) => params,
            None => {
                debug!(collection_name=%collection_name, "collection cache miss");
                let params = self.fetch_collection(collection_name).await?;
                self.collection_cache
                    .put_collection(collection_name, &params)
                    .await?;
                params
            }
        };
        let collection = CollectionReference::new(collection_name, params);
        self.check_describable(&collection, column_filter_opt)
            .await?;
        Ok(collection)
    }

    async fn fetch_collection(
        &self,
        collection_name: &str,
    ) -> CollectionResult<CollectionReferenceParameters> {
        let document = self
            .elastic_client
            .get_document(&self.collection_index, collection_name)
            .await?
            .ok_or_else(|| collection_not_found(collection_name))?;
        let params = serde_json::from_value(document)?;
        Ok(params)
    }

    async fn check_describable(
        &self,
        collection: &CollectionReference,
        column_filter_opt: Option<&ColumnFilter>,
    ) -> CollectionResult<()> {
        match self.describer.describe(collection, column_filter_opt).await {
            Ok(_) => Ok(()),
            Err(CollectionError::NotDescribable(_)) => Err(CollectionError::NotFound(format!(
                "collection `{}` exists but cannot be described",
                collection.collection_name
            ))),
            Err(error) => Err(error),
        }
    }

    /// Validates and stores the parameters of a collection, replacing the previous ones.
    pub async fn upsert_collection(
        &self,
        collection_name: &str,
        mut params: CollectionReferenceParameters,
    ) -> CollectionResult<CollectionReference> {
        validate_collection_name(collection_name)?;
        validate_required_params(&params)?;

        // The mappings may have changed since they were cached.
        self.collection_cache
            .remove_mappings(&params.index_name)
            .await?;
        let mappings = self.describer.get_mappings(&params.index_name).await?;
        let mapping_trees: Vec<(String, MappingTree)> = mappings
            .iter()
            .map(|(index_name, index_mappings)| {
                MappingTree::parse(index_mappings).map(|tree| (index_name.clone(), tree))
            })
            .collect::<CollectionResult<_>>()?;
        if mapping_trees.iter().all(|(_, tree)| tree.is_empty()) {
            return Err(CollectionError::NotFound(format!(
                "no mapping found for index `{}`",
                params.index_name
            )));
        }
        validate_configured_paths(&params, &mapping_trees)?;

        if let Some(timestamp_path) = &params.timestamp_path {
            let timestamp_format = find_node(&mapping_trees, timestamp_path)
                .and_then(|node| match node {
                    MappingNode::Leaf(leaf) => leaf.format.clone(),
                    MappingNode::Object(_) => None,
                })
                .unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string());
            params
                .custom_params
                .insert(TIMESTAMP_FORMAT_KEY.to_string(), timestamp_format);
        }
        let document = serde_json::to_value(&params)?;
        self.elastic_client
            .index_document(&self.collection_index, collection_name, &document)
            .await?;

        self.collection_cache
            .remove_collection(collection_name)
            .await?;
        self.collection_cache
            .remove_mappings(&params.index_name)
            .await?;
        self.collection_cache
            .clear_field_types(collection_name)
            .await?;
        info!(
            collection_name=%collection_name,
            index_name=%params.index_name,
            "stored collection"
        );
        Ok(CollectionReference::new(collection_name, params))
    }

    pub async fn delete_collection(&self, collection_name: &str) -> CollectionResult<()> {
        match self
            .elastic_client
            .delete_document(&self.collection_index, collection_name)
            .await
        {
            Ok(()) => {}
            Err(ElasticError::NotFound(_)) => return Err(collection_not_found(collection_name)),
            Err(error) => {
                return Err(CollectionError::Internal(format!(
                    "failed to delete collection `{collection_name}`: {error}"
                )))
            }
        }
        self.collection_cache
            .remove_collection(collection_name)
            .await?;
        self.collection_cache
            .clear_field_types(collection_name)
            .await?;
        info!(collection_name=%collection_name, "deleted collection");
        Ok(())
    }

    /// Lists the collections visible through `column_filter_opt`, sorted by name.
    ///
    /// Collections whose fields cannot be described are left out.
    pub async fn list_collections(
        &self,
        column_filter_opt: Option<&ColumnFilter>,
    ) -> CollectionResult<Vec<CollectionReference>> {
        let documents = self.scroll_collection_documents(column_filter_opt).await?;
        let mut collections = Vec::with_capacity(documents.len());

        for (collection_name, document) in documents {
            let params: CollectionReferenceParameters = serde_json::from_value(document)?;
            let collection = CollectionReference::new(collection_name, params);
            match self.describer.describe(&collection, column_filter_opt).await {
                Ok(_) => collections.push(collection),
                Err(CollectionError::NotDescribable(_)) => {
                    debug!(
                        collection_name=%collection.collection_name,
                        "skipping collection that cannot be described"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        let collections = collections
            .into_iter()
            .sorted_by(|left, right| left.collection_name.cmp(&right.collection_name))
            .collect();
        Ok(collections)
    }

    /// Scrolls over the collection index, keeping the documents of the visible collections.
    /// The scroll cursor is cleared whether the scroll succeeds or not.
    async fn scroll_collection_documents(
        &self,
        column_filter_opt: Option<&ColumnFilter>,
    ) -> CollectionResult<Vec<(String, JsonValue)>> {
        let search_request = SearchRequest {
            size: self.scroll_page_size,
            keep_alive: self.scroll_keep_alive,
        };
        let first_page = match self
            .elastic_client
            .search(&self.collection_index, &search_request)
            .await
        {
            Ok(first_page) => first_page,
            Err(ElasticError::NotFound(_)) => {
                debug!(collection_index=%self.collection_index, "collection index not found");
                return Ok(Vec::new());
            }
            Err(error) => return Err(error.into()),
        };
        let mut documents = Vec::new();
        let mut scroll_id_opt: Option<String> = None;
        let scroll_result = self
            .drain_scroll(
                first_page,
                column_filter_opt,
                &mut scroll_id_opt,
                &mut documents,
            )
            .await;

        if let Some(scroll_id) = scroll_id_opt {
            if let Err(error) = self.elastic_client.clear_scroll(&scroll_id).await {
                warn!(scroll_id=%scroll_id, error=?error, "failed to clear scroll");
            }
        }
        scroll_result?;
        Ok(documents)
    }

    async fn drain_scroll(
        &self,
        mut page: ScrollPage,
        column_filter_opt: Option<&ColumnFilter>,
        scroll_id_opt: &mut Option<String>,
        documents: &mut Vec<(String, JsonValue)>,
    ) -> CollectionResult<()> {
        loop {
            // The backend may hand out a new scroll id with each page.
            if let Some(scroll_id) = page.scroll_id.take() {
                *scroll_id_opt = Some(scroll_id);
            }
            if page.hits.is_empty() {
                return Ok(());
            }
            for hit in page.hits {
                let is_visible = column_filter_opt
                    .map(|column_filter| column_filter.is_collection_visible(&hit.id))
                    .unwrap_or(true);
                if is_visible {
                    documents.push((hit.id, hit.source));
                }
            }
            let Some(scroll_id) = scroll_id_opt.as_deref() else {
                return Ok(());
            };
            page = self
                .elastic_client
                .scroll(scroll_id, self.scroll_keep_alive)
                .await?;
        }
    }

    pub async fn describe_collection(
        &self,
        collection: &CollectionReference,
        column_filter_opt: Option<&ColumnFilter>,
    ) -> CollectionResult<CollectionDescription> {
        self.describer.describe(collection, column_filter_opt).await
    }

    /// Returns the type of the field at `field_path`.
    pub async fn field_type(
        &self,
        collection: &CollectionReference,
        field_path: &str,
    ) -> CollectionResult<FieldType> {
        let collection_name = &collection.collection_name;

        if let Some(field_type) = self
            .collection_cache
            .get_field_type(collection_name, field_path)
            .await?
        {
            return Ok(field_type);
        }
        debug!(collection_name=%collection_name, field_path=%field_path, "field type cache miss");
        let mappings = self
            .describer
            .get_mappings(&collection.params.index_name)
            .await?;
        let mapping_trees: Vec<(String, MappingTree)> = mappings
            .iter()
            .map(|(index_name, index_mappings)| {
                MappingTree::parse(index_mappings).map(|tree| (index_name.clone(), tree))
            })
            .collect::<CollectionResult<_>>()?;
        let field_type = find_node(&mapping_trees, field_path)
            .map(MappingNode::field_type)
            .ok_or_else(|| {
                CollectionError::InvalidParameter(format!(
                    "field `{field_path}` does not exist in collection `{collection_name}`"
                ))
            })?;
        self.collection_cache
            .put_field_type(collection_name, field_path, field_type)
            .await?;
        Ok(field_type)
    }
}

fn collection_not_found(collection_name: &str) -> CollectionError {
    CollectionError::NotFound(format!("collection `{collection_name}` not found"))
}

fn validate_collection_name(collection_name: &str) -> CollectionResult<()> {
    if collection_name.is_empty() {
        return Err(CollectionError::InvalidParameter(
            "collection name must not be empty".to_string(),
        ));
    }
    if collection_name.starts_with('_')
        || collection_name.contains(char::is_whitespace)
        || collection_name.contains(FORBIDDEN_COLLECTION_NAME_CHARS)
    {
        return Err(CollectionError::InvalidParameter(format!(
            "invalid collection name `{collection_name}`: it must not start with `_` nor \
             contain whitespace or any of {}",
            FORBIDDEN_COLLECTION_NAME_CHARS.iter().join(" ")
        )));
    }
    Ok(())
}

fn validate_required_params(params: &CollectionReferenceParameters) -> CollectionResult<()> {
    if params.index_name.trim().is_empty() {
        return Err(CollectionError::InvalidParameter(
            "`index_name` must not be empty".to_string(),
        ));
    }
    if params.id_path.trim().is_empty() {
        return Err(CollectionError::InvalidParameter(
            "`id_path` must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Returns the first node found at `field_path`, visiting indices in name order.
fn find_node<'a>(
    mapping_trees: &'a [(String, MappingTree)],
    field_path: &str,
) -> Option<&'a MappingNode> {
    mapping_trees
        .iter()
        .find_map(|(_, mapping_tree)| mapping_tree.get(field_path))
}

/// Checks that every configured path exists with a suitable type and is not excluded.
fn validate_configured_paths(
    params: &CollectionReferenceParameters,
    mapping_trees: &[(String, MappingTree)],
) -> CollectionResult<()> {
    let exclude_matcher =
        GlobMatcher::try_from_patterns(&params.exclude_patterns()).map_err(|error| {
            CollectionError::InvalidParameter(format!("invalid `exclude_fields`: {error}"))
        })?;

    for (param_name, field_path) in params.configured_paths() {
        let index_names = || mapping_trees.iter().map(|(index_name, _)| index_name).join(", ");
        let node = find_node(mapping_trees, field_path).ok_or_else(|| {
            CollectionError::InvalidParameter(format!(
                "`{param_name}`: field `{field_path}` does not exist in index `{}`",
                index_names()
            ))
        })?;
        let field_type = node.field_type();
        let expected_types_opt = match param_name {
            "geometry_path" if !field_type.is_geo() => Some("geo_point or geo_shape"),
            "centroid_path" if field_type != FieldType::GeoPoint => Some("geo_point"),
            "timestamp_path" if !field_type.is_timestamp() => Some("date or long"),
            _ => None,
        };
        if let Some(expected_types) = expected_types_opt {
            return Err(CollectionError::InvalidParameter(format!(
                "`{param_name}`: field `{field_path}` is of type {field_type:?}, expected \
                 {expected_types}"
            )));
        }
        if is_excluded(&exclude_matcher, field_path) {
            return Err(CollectionError::InvalidParameter(format!(
                "`{param_name}`: field `{field_path}` is hidden by `exclude_fields`"
            )));
        }
    }
    Ok(())
}

/// A path is excluded if it or one of its ancestors matches an exclusion pattern.
fn is_excluded(exclude_matcher: &GlobMatcher, field_path: &str) -> bool {
    exclude_matcher.is_match(field_path)
        || field_path
            .match_indices('.')
            .any(|(dot_pos, _)| exclude_matcher.is_match(&field_path[..dot_pos]))
}

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

use arlas_cache::CacheStore;
use arlas_elastic::IndexMappings;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{CollectionReferenceParameters, CollectionResult, FieldType};

/// Namespace of the collection parameters, keyed by collection name.
pub const COLLECTIONS_NAMESPACE: &str = "collections";
/// Namespace of the raw mappings, keyed by the `index_name` of collections.
pub const MAPPINGS_NAMESPACE: &str = "mappings";
const FIELD_TYPES_NAMESPACE_PREFIX: &str = "fields.";

/// Namespace of the field types of a collection, keyed by field path.
pub fn field_types_namespace(collection_name: &str) -> String {
    format!("{FIELD_TYPES_NAMESPACE_PREFIX}{collection_name}")
}

/// Typed view over the cache store used by the collection services.
///
/// An entry that cannot be decoded is logged and treated as a miss: the backend is the source
/// of truth and the entry gets overwritten on the next fetch.
#[derive(Clone)]
pub struct CollectionCache {
    cache_store: Arc<dyn CacheStore>,
}

impl CollectionCache {
    pub fn new(cache_store: Arc<dyn CacheStore>) -> Self {
        Self { cache_store }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        namespace: &str,
        key: &str,
    ) -> CollectionResult<Option<T>> {
        let Some(value) = self.cache_store.get(namespace, key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded_value) => Ok(Some(decoded_value)),
            Err(error) => {
                warn!(
                    namespace=%namespace,
                    key=%key,
                    error=?error,
                    "failed to decode cache entry"
                );
                Ok(None)
            }
        }
    }

    async fn put<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> CollectionResult<()> {
        let value: JsonValue = serde_json::to_value(value)?;
        self.cache_store.put(namespace, key, value, None).await?;
        Ok(())
    }

    pub async fn get_collection(
        &self,
        collection_name: &str,
    ) -> CollectionResult<Option<CollectionReferenceParameters>> {
        self.get(COLLECTIONS_NAMESPACE, collection_name).await
    }

    pub async fn put_collection(
        &self,
        collection_name: &str,
        params: &CollectionReferenceParameters,
    ) -> CollectionResult<()> {
        self.put(COLLECTIONS_NAMESPACE, collection_name, params).await
    }

    pub async fn remove_collection(&self, collection_name: &str) -> CollectionResult<()> {
        self.cache_store
            .remove(COLLECTIONS_NAMESPACE, collection_name)
            .await?;
        Ok(())
    }

    pub async fn get_mappings(&self, index_name: &str) -> CollectionResult<Option<IndexMappings>> {
        self.get(MAPPINGS_NAMESPACE, index_name).await
    }

    pub async fn put_mappings(
        &self,
        index_name: &str,
        mappings: &IndexMappings,
    ) -> CollectionResult<()> {
        self.put(MAPPINGS_NAMESPACE, index_name, mappings).await
    }

    pub async fn remove_mappings(&self, index_name: &str) -> CollectionResult<()> {
        self.cache_store
            .remove(MAPPINGS_NAMESPACE, index_name)
            .await?;
        Ok(())
    }

    pub async fn get_field_type(
        &self,
        collection_name: &str,
        field_path: &str,
    ) -> CollectionResult<Option<FieldType>> {
        self.get(&field_types_namespace(collection_name), field_path)
            .await
    }

    pub async fn put_field_type(
        &self,
        collection_name: &str,
        field_path: &str,
        field_type: FieldType,
    ) -> CollectionResult<()> {
        self.put(&field_types_namespace(collection_name), field_path, &field_type)
            .await
    }

    pub async fn clear_field_types(&self, collection_name: &str) -> CollectionResult<()> {
        self.cache_store
            .clear_namespace(&field_types_namespace(collection_name))
            .await?;
        Ok(())
    }
}

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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use ttl_cache::TtlCache;

use crate::{CacheResult, CacheStore};

/// In-process cache store. Each namespace is a TTL map bounded to `max_entries_per_namespace`
/// entries; expired entries are dropped lazily, when accessed.
#[derive(Clone)]
pub struct LocalCacheStore {
    namespaces: Arc<RwLock<HashMap<String, TtlCache<String, JsonValue>>>>,
    default_ttl: Duration,
    max_entries_per_namespace: usize,
}

impl LocalCacheStore {
    pub fn new(default_ttl: Duration, max_entries_per_namespace: usize) -> Self {
        Self {
            namespaces: Arc::default(),
            default_ttl,
            max_entries_per_namespace,
        }
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<JsonValue>> {
        let namespaces_guard = self.namespaces.read().await;
        let value_opt = namespaces_guard
            .get(namespace)
            .and_then(|ttl_cache| ttl_cache.get(key))
            .cloned();
        Ok(value_opt)
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: JsonValue,
        ttl_opt: Option<Duration>,
    ) -> CacheResult<()> {
        let ttl = ttl_opt.unwrap_or(self.default_ttl);
        let mut namespaces_guard = self.namespaces.write().await;
        namespaces_guard
            .entry(namespace.to_string())
            .or_insert_with(|| TtlCache::new(self.max_entries_per_namespace))
            .insert(key.to_string(), value, ttl);
        Ok(())
    }

    async fn remove(&self, namespace: &str, key: &str) -> CacheResult<()> {
        let mut namespaces_guard = self.namespaces.write().await;
        if let Some(ttl_cache) = namespaces_guard.get_mut(namespace) {
            ttl_cache.remove(key);
        }
        Ok(())
    }

    async fn clear_namespace(&self, namespace: &str) -> CacheResult<()> {
        self.namespaces.write().await.remove(namespace);
        Ok(())
    }
}

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

//! Namespaced key/value stores memoizing backend lookups.
//!
//! Entries are JSON values addressed by `(namespace, key)` and expire after a time-to-live.
//! A miss is `Ok(None)`, never an error.

mod cluster_cache_store;
mod error;
mod local_cache_store;
mod noop_cache_store;
mod reconnecting_cache_store;

use std::sync::Arc;
use std::time::Duration;

use arlas_config::{CacheBackend, CacheConfig};
use async_trait::async_trait;
use chitchat::transport::{Transport, UdpTransport};
use serde_json::Value as JsonValue;
use tracing::info;

pub use self::cluster_cache_store::ClusterCacheStore;
pub use self::error::{CacheError, CacheResult};
pub use self::local_cache_store::LocalCacheStore;
pub use self::noop_cache_store::NoopCacheStore;
pub use self::reconnecting_cache_store::{Reconnect, ReconnectingCacheStore};

/// Key/value store partitioned in namespaces.
#[cfg_attr(any(test, feature = "testsuite"), mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns the live value stored under `key` in `namespace`, if any.
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<JsonValue>>;

    /// Stores `value` under `key` in `namespace`. The entry expires after `ttl_opt`, or after the
    /// store's default time-to-live when `ttl_opt` is `None`.
    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: JsonValue,
        ttl_opt: Option<Duration>,
    ) -> CacheResult<()>;

    /// Removes the entry stored under `key` in `namespace`, if any.
    async fn remove(&self, namespace: &str, key: &str) -> CacheResult<()>;

    /// Removes every entry of `namespace`. Clearing an unknown namespace is a no-op.
    async fn clear_namespace(&self, namespace: &str) -> CacheResult<()>;
}

/// Builds the cache store described by `cache_config`. The replicated store gossips over UDP.
pub async fn start_cache_store(cache_config: &CacheConfig) -> anyhow::Result<Arc<dyn CacheStore>> {
    start_cache_store_with_transport(cache_config, Arc::new(UdpTransport)).await
}

/// Same as [`start_cache_store`], with the gossip transport of the replicated store provided by
/// the caller.
pub async fn start_cache_store_with_transport(
    cache_config: &CacheConfig,
    transport: Arc<dyn Transport>,
) -> anyhow::Result<Arc<dyn CacheStore>> {
    let default_ttl = *cache_config.timeout;

    let cache_store: Arc<dyn CacheStore> = match cache_config.backend {
        CacheBackend::Noop => Arc::new(NoopCacheStore),
        CacheBackend::Local => Arc::new(LocalCacheStore::new(
            default_ttl,
            cache_config.max_entries_per_namespace,
        )),
        CacheBackend::Replicated => {
            let cluster_cache_store =
                ClusterCacheStore::join(&cache_config.replicated, default_ttl, transport).await?;
            Arc::new(ReconnectingCacheStore::new(cluster_cache_store))
        }
    };
    info!(
        backend=?cache_config.backend,
        default_ttl=?default_ttl,
        "started cache store"
    );
    Ok(cache_store)
}

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

use std::time::Duration;

use arlas_common::retry::{retry_with_recovery, RetryParams};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{CacheResult, CacheStore};

/// A cache store able to repair its connection to its backing service.
#[async_trait]
pub trait Reconnect: CacheStore {
    async fn reconnect(&self) -> CacheResult<()>;
}

/// Wraps a [`Reconnect`] store: an operation failing with a retryable error triggers a
/// reconnection, then the operation is retried once. A second failure is returned as is.
///
/// Retried operations are idempotent: a put is a last-write-wins overwrite and a removal is a
/// delete-if-present.
pub struct ReconnectingCacheStore<S> {
    inner: S,
    retry_params: RetryParams,
}

impl<S: Reconnect> ReconnectingCacheStore<S> {
    pub fn new(inner: S) -> Self {
        let retry_params = RetryParams {
            max_attempts: 2,
            ..Default::default()
        };
        Self {
            inner,
            retry_params,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn reconnect(&self) -> CacheResult<()> {
        warn!("cache store lost its cluster membership, reconnecting");
        self.inner.reconnect().await
    }
}

#[async_trait]
impl<S: Reconnect> CacheStore for ReconnectingCacheStore<S> {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<JsonValue>> {
        retry_with_recovery(
            &self.retry_params,
            || self.inner.get(namespace, key),
            || self.reconnect(),
        )
        .await
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: JsonValue,
        ttl_opt: Option<Duration>,
    ) -> CacheResult<()> {
        retry_with_recovery(
            &self.retry_params,
            || self.inner.put(namespace, key, value.clone(), ttl_opt),
            || self.reconnect(),
        )
        .await
    }

    async fn remove(&self, namespace: &str, key: &str) -> CacheResult<()> {
        retry_with_recovery(
            &self.retry_params,
            || self.inner.remove(namespace, key),
            || self.reconnect(),
        )
        .await
    }

    async fn clear_namespace(&self, namespace: &str) -> CacheResult<()> {
        retry_with_recovery(
            &self.retry_params,
            || self.inner.clear_namespace(namespace),
            || self.reconnect(),
        )
        .await
    }
}

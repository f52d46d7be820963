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

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{CacheResult, CacheStore};

/// Cache store that never retains anything: every read misses and consults the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCacheStore;

#[async_trait]
impl CacheStore for NoopCacheStore {
    async fn get(&self, _namespace: &str, _key: &str) -> CacheResult<Option<JsonValue>> {
        Ok(None)
    }

    async fn put(
        &self,
        _namespace: &str,
        _key: &str,
        _value: JsonValue,
        _ttl_opt: Option<Duration>,
    ) -> CacheResult<()> {
        Ok(())
    }

    async fn remove(&self, _namespace: &str, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn clear_namespace(&self, _namespace: &str) -> CacheResult<()> {
        Ok(())
    }
}

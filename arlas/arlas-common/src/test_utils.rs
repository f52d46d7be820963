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

use futures::Future;
use tokio::time::Instant;

/// Polls `predicate` every `retry_interval` until it returns true or `timeout` elapses.
pub async fn wait_until_predicate<Fut>(
    mut predicate: impl FnMut() -> Fut,
    timeout: Duration,
    retry_interval: Duration,
) -> anyhow::Result<()>
where
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;

    while !predicate().await {
        if Instant::now() >= deadline {
            anyhow::bail!("predicate still false after {timeout:?}");
        }
        tokio::time::sleep(retry_interval).await;
    }
    Ok(())
}

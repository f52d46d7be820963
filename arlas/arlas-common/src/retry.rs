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

use std::fmt::Debug;
use std::time::Duration;

use futures::Future;
use rand::Rng;
use tracing::{debug, warn};

const DEFAULT_MAX_ATTEMPTS: usize = 2;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(50);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);

pub trait Retryable {
    fn is_retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryParams {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryParams {
    /// Computes the delay after which a new attempt should be performed. The randomized delay
    /// increases after each attempt (exponential backoff and full jitter).
    ///
    /// The caller should pass the number of attempts that have been performed so far.
    ///
    /// # Panics
    ///
    /// Panics if `num_attempts` is zero.
    pub fn compute_delay(&self, num_attempts: usize) -> Duration {
        assert!(num_attempts > 0, "num_attempts should be greater than zero");

        let delay_ms = self.base_delay.as_millis() as u64 * 2u64.pow(num_attempts as u32 - 1);
        let ceil_delay_ms = delay_ms.min(self.max_delay.as_millis() as u64);
        let half_delay_ms = ceil_delay_ms / 2;
        let jitter_range = 0..half_delay_ms + 1;
        let jittered_delay_ms = half_delay_ms + rand::thread_rng().gen_range(jitter_range);
        Duration::from_millis(jittered_delay_ms)
    }

    #[cfg(any(test, feature = "testsuite"))]
    pub fn for_test() -> Self {
        Self {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..Default::default()
        }
    }
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or exhausts
/// `retry_params.max_attempts`.
///
/// Between two attempts, `recover` is awaited so that the caller can repair whatever the
/// retryable error was about (typically a lost connection). A failed recovery ends the loop
/// with the recovery error.
pub async fn retry_with_recovery<U, E, Fut, RecoveryFut>(
    retry_params: &RetryParams,
    f: impl Fn() -> Fut,
    recover: impl Fn() -> RecoveryFut,
) -> Result<U, E>
where
    Fut: Future<Output = Result<U, E>>,
    RecoveryFut: Future<Output = Result<(), E>>,
    E: Retryable + Debug,
{
    let mut num_attempts = 0;

    loop {
        let error = match f().await {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };
        if !error.is_retryable() {
            return Err(error);
        }
        num_attempts += 1;

        if num_attempts >= retry_params.max_attempts {
            warn!(
                num_attempts=%num_attempts,
                error=?error,
                "operation failed"
            );
            return Err(error);
        }
        let delay = retry_params.compute_delay(num_attempts);
        debug!(
            num_attempts=%num_attempts,
            delay_ms=%delay.as_millis(),
            error=?error,
            "operation failed, recovering and retrying"
        );
        tokio::time::sleep(delay).await;
        recover().await?;
    }
}

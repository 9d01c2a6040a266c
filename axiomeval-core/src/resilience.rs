// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Retry policy with exponential backoff.
//!
//! Retry state lives on the stack of a single [`retry`] call, so concurrent
//! callers sharing one policy never influence each other's backoff.

use rand::random;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::exponential()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let jittered = base * jitter_factor;
        let clamped = jittered.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(clamped)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

/// Errors that know whether another attempt may succeed
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error> {
    #[error("All {attempts} attempts failed. Last error: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("Non-retryable failure on attempt {attempt}: {error}")]
    Permanent { attempt: u32, error: E },
}

impl<E: std::error::Error> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Permanent { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Permanent { attempt, .. } => *attempt,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + Retryable,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for_attempt(attempt - 1);
            tokio::time::sleep(delay).await;
        }
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() => {
                return Err(RetryError::Permanent { attempt, error });
            }
            Err(error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            Err(error) => {
                tracing::warn!(
                    "Attempt {}/{} failed, retrying: {}",
                    attempt,
                    max_attempts,
                    error
                );
            }
        }
    }
}

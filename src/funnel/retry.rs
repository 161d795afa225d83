// src/funnel/retry.rs
//! Uniform retry policy for model calls.
//!
//! - Transient: exponential backoff `min(base * 2^(n-1), max)`, up to
//!   `max_transient_attempts` transient failures.
//! - Malformed: retried until `max_malformed_attempts` malformed responses.
//! - Rejected: never retried.
//!
//! Every attempt (first call and each retry) reserves one unit of the run's
//! cost budget before it is made. A timeout is a transient failure.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use tracing::warn;

use crate::error::{FunnelError, ModelCallError};

use super::context::RunContext;
use super::state::Stage;

fn default_max_transient_attempts() -> u32 {
    3
}
fn default_max_malformed_attempts() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_call_timeout_secs() -> u64 {
    30
}

/// `[retry]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_transient_attempts")]
    pub max_transient_attempts: u32,
    #[serde(default = "default_max_malformed_attempts")]
    pub max_malformed_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_attempts: default_max_transient_attempts(),
            max_malformed_attempts: default_max_malformed_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), FunnelError> {
        if self.max_transient_attempts == 0 || self.max_malformed_attempts == 0 {
            return Err(FunnelError::Configuration(
                "retry attempt caps must be at least 1".into(),
            ));
        }
        if self.call_timeout_secs == 0 {
            return Err(FunnelError::Configuration(
                "call_timeout_secs must be at least 1".into(),
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(FunnelError::Configuration(
                "base_delay_ms must not exceed max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Delay before retry number `n` (1-based).
    pub fn backoff(&self, n: u32) -> Duration {
        let factor = 2u64.saturating_pow(n.saturating_sub(1));
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    /// Attempt cap reached (or a non-retryable rejection).
    Exhausted {
        error: ModelCallError,
        attempts: u32,
    },
    /// The run's call ceiling for this stage refused the next attempt.
    BudgetExhausted { attempts: u32 },
}

/// Run `op` under the policy, reserving budget for each attempt.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    ctx: &RunContext,
    stage: Stage,
    record_id: &str,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelCallError>>,
{
    let mut attempts = 0u32;
    let mut transient = 0u32;
    let mut malformed = 0u32;

    loop {
        if !ctx.try_reserve(stage) {
            return Err(RetryFailure::BudgetExhausted { attempts });
        }
        attempts += 1;
        counter!("funnel_model_calls_total", "stage" => stage.as_str()).increment(1);

        let result = match tokio::time::timeout(policy.call_timeout(), op()).await {
            Ok(r) => r,
            Err(_) => Err(ModelCallError::transient("call timed out")),
        };

        let error = match result {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        let exhausted = match &error {
            ModelCallError::Transient { .. } => {
                transient += 1;
                transient >= policy.max_transient_attempts
            }
            ModelCallError::Malformed { .. } => {
                malformed += 1;
                malformed >= policy.max_malformed_attempts
            }
            ModelCallError::Rejected { .. } => true,
        };
        if exhausted {
            return Err(RetryFailure::Exhausted { error, attempts });
        }

        ctx.note_retry();
        counter!(
            "funnel_retries_total",
            "stage" => stage.as_str(),
            "kind" => error.kind()
        )
        .increment(1);

        let delay = policy.backoff(attempts);
        warn!(
            target: "funnel",
            record_id,
            stage = stage.as_str(),
            attempt = attempts,
            kind = error.kind(),
            backoff_ms = delay.as_millis() as u64,
            "model call failed, retrying"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

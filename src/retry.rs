// SPDX-License-Identifier: MIT
//! Fixed-delay attempt budgets for control-plane calls.
//!
//! Provides [`run_attempts`] — a generic async driver that runs a fallible
//! provisioning step up to a budgeted number of attempts with a constant
//! delay between them. The step itself classifies each response into a
//! [`StageOutcome`]; the driver only spends the budget. Delays are fixed
//! rather than exponential because the dominant failure mode is control-plane
//! propagation lag, which clears on a flat timescale.
//!
//! # Example
//! ```rust,ignore
//! use nimbusd::retry::{run_attempts, CancelToken, RetryPolicy, StageOutcome};
//!
//! let policy = RetryPolicy::new(5, Duration::from_secs(2));
//! let result = run_attempts(&policy, &CancelToken::new(), |attempt| async move {
//!     classify(call_control_plane().await)
//! })
//! .await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

/// Result of a single provisioning step attempt.
///
/// Each step classifies the raw control-plane response itself; the retry
/// driver never inspects payloads or status codes.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    /// The step succeeded; the payload is whatever the classifier
    /// validated and extracted from the response.
    Success(T),
    /// Transient failure — worth another attempt if budget remains.
    Retryable(String),
    /// Permanent failure — abort the step immediately, keep the reason.
    Fatal(String),
}

/// Why a step stopped without producing a success payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StepFailure {
    /// The attempt budget ran out; carries the last retryable reason.
    Exhausted(String),
    /// A non-retryable response; carries the preserved error body.
    Fatal(String),
    /// The run's cancel token was tripped at a suspension point.
    Cancelled,
}

impl StepFailure {
    /// The human-readable cause, if one was recorded.
    pub fn reason(&self) -> &str {
        match self {
            StepFailure::Exhausted(r) | StepFailure::Fatal(r) => r,
            StepFailure::Cancelled => "cancelled",
        }
    }
}

/// Attempt budget and inter-attempt delay for one provisioning step.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try). Must be ≥ 1.
    pub max_attempts: u32,
    /// Fixed delay between consecutive attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt, no delay — for non-idempotent calls.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Same budget, 1 ms delays — for unit tests (no real waiting).
    pub fn instant(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }
}

/// Cooperative cancellation flag shared between a run and its owner.
///
/// Checked only at suspension points (before delays, between steps); an
/// in-flight HTTP call always completes before cancellation is observed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Trips a [`CancelToken`] when dropped without being disarmed.
///
/// The gateway holds one of these across a provisioning request: when the
/// caller disconnects, axum drops the handler future, the guard drops, and
/// the spawned workflow winds down at its next suspension point.
pub struct CancelOnDrop {
    token: CancelToken,
    armed: bool,
}

impl CancelOnDrop {
    pub fn new(token: CancelToken) -> Self {
        Self { token, armed: true }
    }

    /// Consume the guard without cancelling — the run finished normally.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the budget is spent.
///
/// Calls `op(attempt)` up to `policy.max_attempts` times (attempts are
/// 1-based). After each [`StageOutcome::Retryable`] with budget remaining,
/// sleeps `policy.delay` and tries again. A [`StageOutcome::Fatal`] stops
/// immediately. The cancel token is checked before the first attempt and
/// before every inter-attempt sleep.
///
/// # Panics
/// Panics if `policy.max_attempts` is 0 (would never attempt the operation).
pub async fn run_attempts<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut op: F,
) -> Result<T, StepFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = StageOutcome<T>>,
{
    assert!(
        policy.max_attempts > 0,
        "RetryPolicy.max_attempts must be at least 1"
    );

    if cancel.is_cancelled() {
        return Err(StepFailure::Cancelled);
    }

    let mut last_reason = String::new();

    for attempt in 1..=policy.max_attempts {
        match op(attempt).await {
            StageOutcome::Success(payload) => {
                if attempt > 1 {
                    debug!(attempt, "attempt succeeded after retries");
                }
                return Ok(payload);
            }
            StageOutcome::Fatal(reason) => {
                warn!(attempt, %reason, "non-retryable failure — aborting step");
                return Err(StepFailure::Fatal(reason));
            }
            StageOutcome::Retryable(reason) => {
                if attempt < policy.max_attempts {
                    warn!(
                        attempt,
                        max = policy.max_attempts,
                        delay_ms = policy.delay.as_millis(),
                        %reason,
                        "attempt failed — retrying"
                    );
                    if cancel.is_cancelled() {
                        return Err(StepFailure::Cancelled);
                    }
                    tokio::time::sleep(policy.delay).await;
                } else {
                    warn!(
                        attempt,
                        max = policy.max_attempts,
                        %reason,
                        "attempt budget exhausted"
                    );
                    last_reason = reason;
                }
            }
        }
    }

    Err(StepFailure::Exhausted(last_reason))
}

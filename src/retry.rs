//! Attempt-indexed retry state machine around one streaming request.
//!
//! `Attempting(n)` moves to:
//! - `Done` on success or graceful EOF;
//! - `Done` with a partial answer when the stream breaks after content arrived;
//! - `Attempting(n + 1)` after `base_backoff * 2^n` when it breaks before any
//!   content and `n < max_retries`;
//! - `Failed` when retries are exhausted or on any fatal (pre-response) error.

use std::time::Duration;

use tracing::{debug, warn};

use crate::accumulator::StreamState;
use crate::errors::{ApiError, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Result of a single streaming attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    CompletedWithPartial(String),
    RetryableFailure(String),
    FatalFailure(ApiError),
}

impl AttemptOutcome {
    /// Classifies how draining a started stream ended.
    pub fn after_stream(state: &StreamState, result: Result<(), StreamError>) -> Self {
        match result {
            Ok(()) => Self::Completed,
            Err(e) if state.has_content => Self::CompletedWithPartial(e.to_string()),
            Err(e) => Self::RetryableFailure(e.to_string()),
        }
    }
}

/// What the controller hands back once it stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAnswer {
    Complete(String),
    /// The stream broke after content arrived; `reason` describes the break.
    Partial { text: String, reason: String },
    /// The stream finished cleanly without a single content delta.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Done(StreamAnswer),
    Retry { next_attempt: u32, after: Duration },
    Failed(ApiError),
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    /// Sleep before attempt `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << attempt.min(16))
    }

    /// Pure transition function for attempt `attempt` (0-based).
    pub fn transition(&self, attempt: u32, state: StreamState, outcome: AttemptOutcome) -> Transition {
        match outcome {
            AttemptOutcome::Completed if state.has_content => {
                Transition::Done(StreamAnswer::Complete(state.text))
            }
            AttemptOutcome::Completed => Transition::Done(StreamAnswer::Empty),
            AttemptOutcome::CompletedWithPartial(reason) => Transition::Done(StreamAnswer::Partial {
                text: state.text,
                reason,
            }),
            AttemptOutcome::RetryableFailure(_) if attempt < self.max_retries => Transition::Retry {
                next_attempt: attempt + 1,
                after: self.backoff(attempt),
            },
            AttemptOutcome::RetryableFailure(reason) => Transition::Failed(ApiError::Network(format!(
                "chat stream failed after {} attempts: {reason}",
                attempt + 1
            ))),
            AttemptOutcome::FatalFailure(err) => Transition::Failed(err),
        }
    }
}

/// One from-scratch streaming attempt. Implementations open a fresh
/// connection per call and release it before returning.
#[async_trait::async_trait]
pub trait StreamAttempt: Send + Sync {
    async fn attempt(&self, attempt: u32, state: &mut StreamState) -> AttemptOutcome;
}

/// Drives `attempt` through the state machine. Each attempt starts from an
/// empty [`StreamState`]; nothing leaks across attempts.
///
/// Dropping the returned future cancels the in-flight attempt or backoff.
pub async fn run_with_retry<A>(policy: &RetryPolicy, attempt: &A) -> Result<StreamAnswer, ApiError>
where
    A: StreamAttempt + ?Sized,
{
    let mut n = 0;
    loop {
        let mut state = StreamState::default();
        let outcome = attempt.attempt(n, &mut state).await;
        debug!(attempt = n, outcome = ?outcome, "stream attempt finished");
        match policy.transition(n, state, outcome) {
            Transition::Done(answer) => {
                if let StreamAnswer::Partial { reason, .. } = &answer {
                    warn!(attempt = n, %reason, "accepting partial answer after stream interruption");
                }
                return Ok(answer);
            }
            Transition::Retry { next_attempt, after } => {
                warn!(
                    attempt = n,
                    max_retries = policy.max_retries,
                    backoff_ms = after.as_millis() as u64,
                    "stream interrupted before any content; retrying"
                );
                tokio::time::sleep(after).await;
                n = next_attempt;
            }
            Transition::Failed(err) => return Err(err),
        }
    }
}

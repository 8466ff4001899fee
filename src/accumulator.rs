//! Turns chat-stream frames into the final answer text.

use futures::{Stream, StreamExt as _};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::errors::StreamError;

/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Content-bearing frames between two progress reports.
const PROGRESS_EVERY: u32 = 5;
/// Progress estimates stay strictly below completion.
const PROGRESS_CEILING: f64 = 0.95;

/// State for one logical request; owned by the task that issued it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamState {
    pub text: String,
    pub has_content: bool,
    pub is_done: bool,
}

/// Fire-and-forget sink for progress fractions in `[0, 1)`.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: f64, message: &str);
}

#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

pub struct Accumulator<'a> {
    state: &'a mut StreamState,
    progress: Option<&'a dyn ProgressReporter>,
    content_frames: u32,
    last_reported: f64,
}

impl<'a> Accumulator<'a> {
    pub fn new(state: &'a mut StreamState, progress: Option<&'a dyn ProgressReporter>) -> Self {
        Self {
            state,
            progress,
            content_frames: 0,
            last_reported: 0.0,
        }
    }

    /// Consumes one frame payload. Malformed payloads are skipped.
    pub fn push_frame(&mut self, payload: &str) -> Step {
        if payload.trim() == DONE_SENTINEL {
            self.state.is_done = true;
            return Step::Done;
        }

        let chunk: Chunk = match serde_json::from_str(payload) {
            Ok(c) => c,
            Err(e) => {
                trace!(error = %e, "skipping non-JSON stream frame");
                return Step::Continue;
            }
        };

        let delta = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|t| !t.is_empty());

        if let Some(text) = delta {
            self.state.text.push_str(&text);
            self.state.has_content = true;
            self.content_frames += 1;
            self.maybe_report();
        }
        Step::Continue
    }

    fn maybe_report(&mut self) {
        let Some(progress) = self.progress else { return };
        if self.content_frames % PROGRESS_EVERY != 0 {
            return;
        }
        let estimate = estimate_progress(self.content_frames);
        if estimate > self.last_reported {
            self.last_reported = estimate;
            progress.report(estimate, "Receiving answer");
        }
    }
}

/// Saturating curve: grows with every frame, never reaches the ceiling.
fn estimate_progress(content_frames: u32) -> f64 {
    let n = f64::from(content_frames);
    (n / (n + 50.0)).min(PROGRESS_CEILING)
}

/// Drains `frames` into `state` until the sentinel or end of stream.
///
/// On a transport error the text gathered so far stays in `state`; the caller
/// decides whether it is usable.
pub async fn drain<S>(
    frames: S,
    state: &mut StreamState,
    progress: Option<&dyn ProgressReporter>,
) -> Result<(), StreamError>
where
    S: Stream<Item = Result<String, StreamError>>,
{
    futures::pin_mut!(frames);
    let mut acc = Accumulator::new(state, progress);
    while let Some(frame) = frames.next().await {
        if acc.push_frame(&frame?) == Step::Done {
            break;
        }
    }
    debug!(chars = state.text.len(), done = state.is_done, "chat stream drained");
    Ok(())
}

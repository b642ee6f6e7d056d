//! Fallback history poller.
//!
//! The push channel can silently drop the terminal `completed` message, so
//! once a job id is known the orchestrator also polls
//! `GET /history/{prompt_id}` on a fixed interval. A failed poll means the
//! job is still pending. Only a non-empty image set counts as completion;
//! a history entry with status `error` counts as failure.

use std::sync::Arc;
use std::time::Duration;

use studio_core::types::{ImageRef, PromptId};
use studio_engine::api::{EngineApi, HistoryResponse};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// History status the engine reports for a failed job.
const ERROR_STATUS: &str = "error";

/// Shortest interval the poller runs at; a zero period is raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Failure message for a job whose history reports an error.
pub const POLLED_FAILURE_MESSAGE: &str = "Generation failed";

/// What one history lookup says about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Results(Vec<ImageRef>),
    Failed(String),
}

/// A terminal outcome reported back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub prompt_id: PromptId,
    pub outcome: PollOutcome,
}

/// Interpret a history entry.
pub fn classify(history: &HistoryResponse) -> PollOutcome {
    if !history.images.is_empty() {
        PollOutcome::Results(history.images.clone())
    } else if history.status.eq_ignore_ascii_case(ERROR_STATUS) {
        PollOutcome::Failed(POLLED_FAILURE_MESSAGE.to_string())
    } else {
        PollOutcome::Pending
    }
}

/// Poll the history of `prompt_id` every `interval` until a terminal
/// outcome is found or `cancel` fires.
///
/// The first lookup happens one interval after the call. The terminal
/// outcome is sent on `reports` and the poller stops. Intervals below
/// [`MIN_POLL_INTERVAL`] are raised to it.
pub async fn run_poller<T>(
    api: Arc<dyn EngineApi>,
    prompt_id: PromptId,
    interval: Duration,
    cancel: CancellationToken,
    reports: mpsc::UnboundedSender<T>,
) where
    T: From<PollReport> + Send,
{
    let interval = interval.max(MIN_POLL_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = api.history(&prompt_id) => result,
        };

        let outcome = match result {
            Ok(history) => classify(&history),
            Err(e) => {
                tracing::debug!(prompt_id = %prompt_id, error = %e, "History not available yet");
                PollOutcome::Pending
            }
        };

        if outcome == PollOutcome::Pending {
            continue;
        }

        tracing::info!(prompt_id = %prompt_id, ?outcome, "Poller found a terminal outcome");
        let report = PollReport {
            prompt_id: prompt_id.clone(),
            outcome,
        };
        let _ = reports.send(T::from(report));
        break;
    }

    tracing::debug!(prompt_id = %prompt_id, "Poller stopped");
}

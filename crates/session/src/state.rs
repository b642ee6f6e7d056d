//! Session record and its state machine.
//!
//! [`reduce`] is a pure function: given the current [`Session`] and a
//! [`SessionEvent`] it returns the next session, or `None` when the event
//! does not apply in the current state. Once a session is terminal every
//! event is ignored, so the first terminal transition wins regardless of
//! whether it came from the push channel, the poller, the deadline or the
//! caller.

use chrono::Utc;
use studio_core::types::{ImageRef, PromptId, Timestamp};
use uuid::Uuid;

/// Failure message used when the overall deadline expires.
pub const TIMEOUT_MESSAGE: &str = "Generation timed out";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle states of a generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Queued or Running.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Progress of a running job.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// The node or step currently executing.
    pub label: String,
    /// 0-100, as reported by the engine.
    pub percentage: f32,
}

impl Progress {
    fn start() -> Self {
        Self {
            label: String::new(),
            percentage: 0.0,
        }
    }
}

/// One outstanding generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Local identifier used to correlate log lines.
    pub id: Uuid,
    /// Engine-assigned job id; `None` until a submission is accepted.
    pub prompt_id: Option<PromptId>,
    pub state: SessionState,
    /// Meaningful only while Queued.
    pub queue_position: Option<u32>,
    /// Meaningful only while Running.
    pub progress: Option<Progress>,
    /// Latest preview frame, present only while Running.
    pub preview: Option<String>,
    /// Produced images, set only on Completed.
    pub results: Vec<ImageRef>,
    /// Set only on Failed.
    pub error: Option<String>,
    pub submitted_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
}

impl Session {
    /// A fresh session with nothing submitted.
    pub fn idle() -> Self {
        Self {
            id: Uuid::now_v7(),
            prompt_id: None,
            state: SessionState::Idle,
            queue_position: None,
            progress: None,
            preview: None,
            results: Vec::new(),
            error: None,
            submitted_at: None,
            finished_at: None,
        }
    }

    /// Whether this session tracks `prompt_id`.
    pub fn is_for(&self, prompt_id: &str) -> bool {
        self.prompt_id.as_deref() == Some(prompt_id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::idle()
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The engine accepted the submission.
    Submitted {
        prompt_id: PromptId,
        queue_position: u32,
    },
    Queued {
        queue_position: u32,
    },
    Started,
    Progress {
        label: String,
        percentage: f32,
    },
    Preview {
        image_data: String,
    },
    /// Pushed completion.
    Completed {
        images: Vec<ImageRef>,
    },
    /// Completion discovered by the poller.
    ResultsFound {
        images: Vec<ImageRef>,
    },
    Failed {
        message: String,
    },
    Cancelled,
    TimedOut,
}

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

/// Apply `event` to `session`.
///
/// Returns `None` when the event is ignored.
pub fn reduce(session: &Session, event: &SessionEvent) -> Option<Session> {
    use SessionState::*;

    if session.state.is_terminal() {
        return None;
    }

    let mut next = session.clone();
    match (session.state, event) {
        (
            Idle,
            SessionEvent::Submitted {
                prompt_id,
                queue_position,
            },
        ) => {
            next.prompt_id = Some(prompt_id.clone());
            next.state = Queued;
            next.queue_position = Some(*queue_position);
            next.submitted_at = Some(Utc::now());
        }
        (Queued, SessionEvent::Queued { queue_position }) => {
            next.queue_position = Some(*queue_position);
        }
        (Queued | Running, SessionEvent::Started) => {
            enter_running(&mut next);
            next.progress = Some(Progress::start());
            next.error = None;
            next.preview = None;
        }
        (Queued | Running, SessionEvent::Progress { label, percentage }) => {
            enter_running(&mut next);
            next.progress = Some(Progress {
                label: label.clone(),
                percentage: *percentage,
            });
        }
        (Queued | Running, SessionEvent::Preview { image_data }) => {
            enter_running(&mut next);
            next.progress.get_or_insert_with(Progress::start);
            next.preview = Some(image_data.clone());
        }
        (
            Queued | Running,
            SessionEvent::Completed { images } | SessionEvent::ResultsFound { images },
        ) => {
            finish(&mut next, Completed);
            next.results = images.clone();
        }
        (Queued | Running, SessionEvent::Failed { message }) => {
            finish(&mut next, Failed);
            next.error = Some(message.clone());
        }
        (Queued | Running, SessionEvent::TimedOut) => {
            finish(&mut next, Failed);
            next.error = Some(TIMEOUT_MESSAGE.to_string());
        }
        (Queued | Running, SessionEvent::Cancelled) => {
            finish(&mut next, Cancelled);
        }
        _ => return None,
    }

    Some(next)
}

/// Move to Running, clearing whatever belonged to the previous state.
fn enter_running(session: &mut Session) {
    if session.state != SessionState::Running {
        session.state = SessionState::Running;
        session.queue_position = None;
        session.preview = None;
    }
}

fn finish(session: &mut Session, state: SessionState) {
    session.state = state;
    session.queue_position = None;
    session.progress = None;
    session.preview = None;
    session.finished_at = Some(Utc::now());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn image(name: &str) -> ImageRef {
        ImageRef {
            filename: name.into(),
            subfolder: String::new(),
            image_type: "output".into(),
        }
    }

    fn step(session: &Session, event: SessionEvent) -> Session {
        reduce(session, &event).unwrap_or_else(|| panic!("{event:?} was ignored"))
    }

    fn queued() -> Session {
        step(
            &Session::idle(),
            SessionEvent::Submitted {
                prompt_id: "p1".into(),
                queue_position: 4,
            },
        )
    }

    fn running() -> Session {
        step(&queued(), SessionEvent::Started)
    }

    fn terminal_events() -> Vec<SessionEvent> {
        vec![
            SessionEvent::Completed {
                images: vec![image("a.png")],
            },
            SessionEvent::ResultsFound {
                images: vec![image("b.png")],
            },
            SessionEvent::Failed {
                message: "boom".into(),
            },
            SessionEvent::Cancelled,
            SessionEvent::TimedOut,
        ]
    }

    #[test]
    fn submission_moves_idle_to_queued() {
        let session = queued();
        assert_eq!(session.state, SessionState::Queued);
        assert!(session.is_for("p1"));
        assert_eq!(session.queue_position, Some(4));
        assert!(session.submitted_at.is_some());
    }

    #[test]
    fn idle_ignores_job_events() {
        let idle = Session::idle();
        assert_eq!(reduce(&idle, &SessionEvent::Started), None);
        assert_eq!(reduce(&idle, &SessionEvent::Cancelled), None);
        assert_eq!(reduce(&idle, &SessionEvent::TimedOut), None);
    }

    #[test]
    fn queue_position_updates_while_queued() {
        let session = step(&queued(), SessionEvent::Queued { queue_position: 1 });
        assert_eq!(session.queue_position, Some(1));
        assert_eq!(reduce(&running(), &SessionEvent::Queued { queue_position: 1 }), None);
    }

    #[test]
    fn started_resets_progress() {
        let session = running();
        assert_eq!(session.state, SessionState::Running);
        assert_eq!(session.progress, Some(Progress::start()));
        assert_eq!(session.queue_position, None);
    }

    #[test]
    fn started_while_running_clears_preview() {
        let previewing = step(
            &running(),
            SessionEvent::Preview {
                image_data: "data:1".into(),
            },
        );
        let restarted = step(&previewing, SessionEvent::Started);
        assert_eq!(restarted.state, SessionState::Running);
        assert_eq!(restarted.preview, None);
        assert_eq!(restarted.progress, Some(Progress::start()));
    }

    #[test]
    fn progress_while_queued_implies_started() {
        let session = step(
            &queued(),
            SessionEvent::Progress {
                label: "KSampler".into(),
                percentage: 10.0,
            },
        );
        assert_eq!(session.state, SessionState::Running);
        assert_eq!(session.progress.as_ref().map(|p| p.label.as_str()), Some("KSampler"));
    }

    #[test]
    fn progress_is_not_clamped() {
        let high = step(
            &running(),
            SessionEvent::Progress {
                label: "3".into(),
                percentage: 80.0,
            },
        );
        let low = step(
            &high,
            SessionEvent::Progress {
                label: "9".into(),
                percentage: 5.0,
            },
        );
        assert_eq!(low.progress.map(|p| p.percentage), Some(5.0));
    }

    #[test]
    fn preview_replaces_previous_frame() {
        let first = step(
            &running(),
            SessionEvent::Preview {
                image_data: "data:1".into(),
            },
        );
        let second = step(
            &first,
            SessionEvent::Preview {
                image_data: "data:2".into(),
            },
        );
        assert_eq!(second.preview.as_deref(), Some("data:2"));
    }

    #[test]
    fn completion_clears_transient_state() {
        let previewing = step(
            &running(),
            SessionEvent::Preview {
                image_data: "data:1".into(),
            },
        );
        let done = step(
            &previewing,
            SessionEvent::Completed {
                images: vec![image("a.png")],
            },
        );
        assert_eq!(done.state, SessionState::Completed);
        assert_eq!(done.results, vec![image("a.png")]);
        assert_eq!(done.preview, None);
        assert_eq!(done.progress, None);
        assert_eq!(done.error, None);
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn queued_job_can_complete_directly() {
        let done = step(
            &queued(),
            SessionEvent::ResultsFound {
                images: vec![image("b.png")],
            },
        );
        assert_eq!(done.state, SessionState::Completed);
    }

    #[test]
    fn failure_stores_message() {
        let failed = step(
            &running(),
            SessionEvent::Failed {
                message: "CUDA out of memory".into(),
            },
        );
        assert_eq!(failed.state, SessionState::Failed);
        assert_eq!(failed.error.as_deref(), Some("CUDA out of memory"));
        assert!(failed.results.is_empty());
    }

    #[test]
    fn timeout_fails_with_fixed_message() {
        let failed = step(&queued(), SessionEvent::TimedOut);
        assert_matches!(failed.state, SessionState::Failed);
        assert_eq!(failed.error.as_deref(), Some(TIMEOUT_MESSAGE));
    }

    #[test]
    fn first_terminal_transition_wins() {
        for first in terminal_events() {
            let terminal = step(&running(), first.clone());
            for later in terminal_events()
                .into_iter()
                .chain([SessionEvent::Started, SessionEvent::Queued { queue_position: 0 }])
            {
                assert_eq!(
                    reduce(&terminal, &later),
                    None,
                    "{later:?} applied after {first:?}"
                );
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Idle.is_terminal());
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Running.is_active());
    }
}

//! Routing of pushed engine messages.
//!
//! [`route`] decides, for one parsed [`EngineMessage`], whether it
//! concerns the active session and, if so, which [`SessionEvent`] it
//! becomes. It is pure; the orchestrator feeds the result to the reducer.

use studio_engine::messages::EngineMessage;

use crate::state::SessionEvent;

/// Placeholder job id the engine bridge uses for previews it cannot
/// attribute to a prompt.
pub const CURRENT_JOB_PLACEHOLDER: &str = "current";

/// Where a message should go.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Apply to the active session.
    Session(SessionEvent),
    /// Connection lifecycle (the hello); handled by the connection manager.
    Connection,
    /// Engine-wide information that never touches a session.
    Global,
    /// Concerns a job other than the active one, or there is none.
    Foreign,
}

/// Route `msg` given the active session's job id.
pub fn route(msg: &EngineMessage, active: Option<&str>) -> Route {
    match msg {
        EngineMessage::Connected { .. } => return Route::Connection,
        EngineMessage::QueueStatus { .. } | EngineMessage::Error { prompt_id: None, .. } => {
            return Route::Global;
        }
        _ => {}
    }

    let attributed = match (msg.prompt_id(), active) {
        (Some(job), Some(active)) => {
            job == active
                || (matches!(msg, EngineMessage::Preview { .. }) && job == CURRENT_JOB_PLACEHOLDER)
        }
        _ => false,
    };
    if !attributed {
        return Route::Foreign;
    }

    match session_event(msg) {
        Some(event) => Route::Session(event),
        None => Route::Global,
    }
}

fn session_event(msg: &EngineMessage) -> Option<SessionEvent> {
    let event = match msg {
        EngineMessage::Queued { queue_position, .. } => SessionEvent::Queued {
            queue_position: *queue_position,
        },
        EngineMessage::Started { .. } => SessionEvent::Started,
        EngineMessage::Progress {
            node, percentage, ..
        } => SessionEvent::Progress {
            label: node.clone(),
            percentage: *percentage,
        },
        EngineMessage::Preview { image_data, .. } => SessionEvent::Preview {
            image_data: image_data.clone(),
        },
        EngineMessage::Completed { images, .. } => SessionEvent::Completed {
            images: images.clone(),
        },
        EngineMessage::Error { message, .. } => SessionEvent::Failed {
            message: message.clone(),
        },
        EngineMessage::Connected { .. } | EngineMessage::QueueStatus { .. } => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn hello_routes_to_connection() {
        let msg = EngineMessage::Connected {
            client_id: "c".into(),
        };
        assert_eq!(route(&msg, Some("p1")), Route::Connection);
    }

    #[test]
    fn global_messages_never_touch_the_session() {
        let status = EngineMessage::QueueStatus {
            running: 1,
            pending: 0,
        };
        let engine_error = EngineMessage::Error {
            prompt_id: None,
            message: "engine unreachable".into(),
        };
        assert_eq!(route(&status, Some("p1")), Route::Global);
        assert_eq!(route(&engine_error, Some("p1")), Route::Global);
    }

    #[test]
    fn foreign_job_is_dropped() {
        let msg = EngineMessage::Started {
            prompt_id: "other".into(),
        };
        assert_eq!(route(&msg, Some("p1")), Route::Foreign);
        assert_eq!(route(&msg, None), Route::Foreign);
    }

    #[test]
    fn matching_job_maps_by_type() {
        let progress = EngineMessage::Progress {
            prompt_id: "p1".into(),
            node: "KSampler".into(),
            value: 7,
            max: 28,
            percentage: 25.0,
        };
        assert_matches!(
            route(&progress, Some("p1")),
            Route::Session(SessionEvent::Progress { label, .. }) if label == "KSampler"
        );

        let error = EngineMessage::Error {
            prompt_id: Some("p1".into()),
            message: "node failed".into(),
        };
        assert_eq!(
            route(&error, Some("p1")),
            Route::Session(SessionEvent::Failed {
                message: "node failed".into()
            })
        );
    }

    #[test]
    fn placeholder_preview_is_attributed_to_active_job() {
        let preview = EngineMessage::Preview {
            prompt_id: CURRENT_JOB_PLACEHOLDER.into(),
            image_data: "data:image/png;base64,AAAA".into(),
        };
        assert_matches!(
            route(&preview, Some("p1")),
            Route::Session(SessionEvent::Preview { .. })
        );
        assert_eq!(route(&preview, None), Route::Foreign);
    }

    #[test]
    fn placeholder_only_applies_to_previews() {
        let completed = EngineMessage::Completed {
            prompt_id: CURRENT_JOB_PLACEHOLDER.into(),
            images: Vec::new(),
        };
        assert_eq!(route(&completed, Some("p1")), Route::Foreign);
    }
}

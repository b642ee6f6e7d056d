//! Event channel message types and parser.
//!
//! The engine pushes JSON messages over WebSocket with a flat shape:
//! `{"type": "<kind>", ...fields}`. This module deserializes them into a
//! strongly-typed [`EngineMessage`] enum.

use serde::{Deserialize, Serialize};
use studio_core::types::{ImageRef, PromptId};

/// All known event channel message types.
///
/// Deserialized via the internally-tagged `"type"` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    /// Handshake sent by the server right after the socket opens.
    Connected { client_id: String },

    /// A prompt entered the engine's queue.
    Queued {
        prompt_id: PromptId,
        queue_position: u32,
    },

    /// A prompt has started executing.
    Started { prompt_id: PromptId },

    /// Step-level progress within the currently executing node.
    Progress {
        prompt_id: PromptId,
        /// The node currently executing.
        #[serde(default)]
        node: String,
        value: u32,
        max: u32,
        /// Completion percentage (0-100) as computed by the server.
        percentage: f32,
    },

    /// A transient preview frame, usually a `data:` URL.
    Preview {
        prompt_id: PromptId,
        image_data: String,
    },

    /// Execution finished and produced output images.
    Completed {
        prompt_id: PromptId,
        #[serde(default)]
        images: Vec<ImageRef>,
    },

    /// Execution failed. `prompt_id` is absent for engine-wide errors.
    Error {
        prompt_id: Option<PromptId>,
        message: String,
    },

    /// Queue depth broadcast.
    QueueStatus { running: u32, pending: u32 },
}

impl EngineMessage {
    /// The job this message concerns, or `None` for connection-level and
    /// global messages.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Queued { prompt_id, .. }
            | Self::Started { prompt_id }
            | Self::Progress { prompt_id, .. }
            | Self::Preview { prompt_id, .. }
            | Self::Completed { prompt_id, .. } => Some(prompt_id),
            Self::Error { prompt_id, .. } => prompt_id.as_deref(),
            Self::Connected { .. } | Self::QueueStatus { .. } => None,
        }
    }

    /// Short name matching the wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Queued { .. } => "queued",
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::Preview { .. } => "preview",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::QueueStatus { .. } => "queue_status",
        }
    }
}

/// Parse an event channel text frame into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log and continue.
pub fn parse_message(text: &str) -> Result<EngineMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_connected_message() {
        let msg = parse_message(r#"{"type":"connected","client_id":"c-1"}"#).unwrap();
        assert_matches!(msg, EngineMessage::Connected { client_id } if client_id == "c-1");
    }

    #[test]
    fn parse_queued_message() {
        let msg =
            parse_message(r#"{"type":"queued","prompt_id":"p1","queue_position":2}"#).unwrap();
        assert_eq!(msg.prompt_id(), Some("p1"));
        assert_matches!(msg, EngineMessage::Queued { queue_position: 2, .. });
    }

    #[test]
    fn parse_progress_message() {
        let json = r#"{"type":"progress","prompt_id":"p1","node":"3","value":5,"max":20,"percentage":25.0}"#;
        match parse_message(json).unwrap() {
            EngineMessage::Progress {
                node,
                value,
                max,
                percentage,
                ..
            } => {
                assert_eq!(node, "3");
                assert_eq!((value, max), (5, 20));
                assert!((percentage - 25.0).abs() < f32::EPSILON);
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_completed_message() {
        let json = r#"{"type":"completed","prompt_id":"p1","images":[{"filename":"a.png","subfolder":"","type":"output"}]}"#;
        match parse_message(json).unwrap() {
            EngineMessage::Completed { prompt_id, images } => {
                assert_eq!(prompt_id, "p1");
                assert_eq!(images.len(), 1);
                assert_eq!(images[0].filename, "a.png");
                assert_eq!(images[0].image_type, "output");
            }
            other => panic!("Expected Completed, got {other:?}"),
        }
    }

    #[test]
    fn parse_error_without_prompt() {
        let msg = parse_message(r#"{"type":"error","prompt_id":null,"message":"boom"}"#).unwrap();
        assert_eq!(msg.prompt_id(), None);
        assert_eq!(msg.kind(), "error");
    }

    #[test]
    fn parse_queue_status_message() {
        let msg = parse_message(r#"{"type":"queue_status","running":1,"pending":4}"#).unwrap();
        assert_eq!(msg, EngineMessage::QueueStatus { running: 1, pending: 4 });
    }

    #[test]
    fn serialized_form_round_trips_tag() {
        let msg = EngineMessage::Started {
            prompt_id: "p9".into(),
        };
        let text = serde_json::to_string(&msg).unwrap();
        assert_eq!(text, r#"{"type":"started","prompt_id":"p9"}"#);
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        assert!(parse_message(r#"{"type":"unknown_thing"}"#).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }
}

use studio_core::error::CoreError;
use studio_engine::api::EngineApiError;

/// Errors returned by the orchestrator's caller-facing API.
///
/// Job failures are not errors here; they end the session in a terminal
/// state instead.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request was rejected before any network call.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// The engine refused or never received the submission. The session
    /// stays Idle.
    #[error("Failed to submit generation: {0}")]
    Submission(#[source] EngineApiError),

    /// Cancel was requested with no job in flight.
    #[error("No active generation")]
    NotActive,

    /// A newer submission replaced the awaited session.
    #[error("Session was replaced by a newer submission")]
    Superseded,

    #[error("Orchestrator has shut down")]
    Shutdown,
}

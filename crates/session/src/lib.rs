//! Generation session lifecycle.
//!
//! A session follows one submitted job from acceptance to a terminal
//! state. Push events (via [`dispatcher`]) and history polls (via
//! [`poller`]) both feed the pure reducer in [`state`]; the
//! [`orchestrator`] owns the session and serializes every input.

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod poller;
pub mod state;

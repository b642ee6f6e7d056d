//! Lifecycle events published by the connection manager.

use crate::messages::EngineMessage;

/// An event broadcast by the
/// [`ConnectionManager`](crate::connection::ConnectionManager).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The server's hello arrived and assigned this client identifier.
    Connected { client_id: String },

    /// The socket closed, whether requested or not.
    Disconnected,

    /// A transport error. Reconnection is driven by the closure that
    /// follows, not by this event.
    Error { message: String },

    /// A parsed inbound message other than the hello.
    Message(EngineMessage),
}

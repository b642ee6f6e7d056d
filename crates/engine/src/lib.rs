//! Transport layer for the generation engine.
//!
//! Provides typed event channel message parsing, the WebSocket client and
//! its reconnect policy, the shared [`connection::ConnectionManager`], and
//! the HTTP API wrappers used to submit, inspect and interrupt jobs.

pub mod api;
pub mod client;
pub mod connection;
pub mod events;
pub mod messages;
pub mod reconnect;

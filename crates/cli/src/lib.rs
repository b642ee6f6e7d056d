//! Terminal front end for generation sessions.
//!
//! [`config`] loads the client settings from the environment and
//! [`prompt`] turns user input into the text that is submitted.

pub mod config;
pub mod prompt;

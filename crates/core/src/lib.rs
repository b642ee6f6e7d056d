//! Domain types and pure logic for the comfy-studio client.
//!
//! Nothing in this crate performs I/O: the structured prompt codec,
//! generation request validation and preference normalization are all
//! deterministic functions shared by the engine and session crates.

pub mod error;
pub mod generation;
pub mod preferences;
pub mod structured_prompt;
pub mod types;

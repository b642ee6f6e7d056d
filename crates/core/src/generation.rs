//! Generation request parameters and validation.
//!
//! [`GenerateRequest`] is the body of `POST /generate`. Every field except
//! the prompt has a default matching the model's recommended settings, so
//! a request deserialized from `{"prompt": "..."}` is ready to submit.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Smallest width or height the engine accepts, in pixels.
pub const MIN_DIMENSION: u32 = 64;

/// Largest width or height the engine accepts, in pixels.
pub const MAX_DIMENSION: u32 = 4096;

/// Seed value asking the engine to pick a random seed.
pub const RANDOM_SEED: i64 = -1;

/// Upper bound (exclusive) for client-chosen random seeds.
const MAX_RANDOM_SEED: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Parameters for a single image generation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Positive prompt text, including any system prompt preamble.
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    /// Classifier-free guidance scale.
    #[serde(default = "default_cfg")]
    pub cfg: f32,
    /// `-1` lets the engine choose.
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_sampler")]
    pub sampler_name: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
}

fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    1536
}
fn default_steps() -> u32 {
    28
}
fn default_cfg() -> f32 {
    4.5
}
fn default_seed() -> i64 {
    RANDOM_SEED
}
fn default_sampler() -> String {
    "res_multistep".to_string()
}
fn default_scheduler() -> String {
    "linear_quadratic".to_string()
}

impl GenerateRequest {
    /// A request for `prompt` with every other parameter at its default.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            width: default_width(),
            height: default_height(),
            steps: default_steps(),
            cfg: default_cfg(),
            seed: default_seed(),
            sampler_name: default_sampler(),
            scheduler: default_scheduler(),
        }
    }

    /// Replace the seed with a fresh client-side random value.
    pub fn with_random_seed(mut self) -> Self {
        self.seed = rand::rng().random_range(0..MAX_RANDOM_SEED);
        self
    }

    /// Check the request before it is sent anywhere.
    ///
    /// A blank prompt or an out-of-range dimension is a
    /// [`CoreError::Validation`].
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("Please enter a prompt".to_string()));
        }
        validate_dimension("Width", self.width)?;
        validate_dimension("Height", self.height)?;
        Ok(())
    }
}

fn validate_dimension(label: &str, value: u32) -> Result<(), CoreError> {
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{label} must be between {MIN_DIMENSION} and {MAX_DIMENSION} (got {value})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Client-side preferences.
//!
//! These are the values a user expects to survive between runs: where
//! the engine lives, how prompts are authored, and the last system prompt
//! and caption. Persistence is the caller's concern; this module only
//! defines the record and normalizes its values.

use serde::{Deserialize, Serialize};

use crate::structured_prompt::DEFAULT_SYSTEM_PROMPT;

/// Engine address used when none has been configured.
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8188";

/// How the user authors the prompt text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Free text, submitted as typed.
    #[default]
    Normal,
    /// Character and tag records, submitted through the structured codec.
    Structured,
}

impl PromptMode {
    /// Parse the persisted form. Unknown values fall back to
    /// [`PromptMode::Normal`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "structured" => Self::Structured,
            _ => Self::Normal,
        }
    }
}

/// Persisted client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_engine_url")]
    pub engine_url: String,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub caption: String,
}

fn default_engine_url() -> String {
    DEFAULT_ENGINE_URL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            engine_url: default_engine_url(),
            prompt_mode: PromptMode::default(),
            system_prompt: default_system_prompt(),
            caption: String::new(),
        }
    }
}

impl Preferences {
    /// Set the engine URL, normalizing it on the way in.
    pub fn set_engine_url(&mut self, url: &str) {
        self.engine_url = normalize_engine_url(url);
    }
}

/// Normalize a user-entered engine address.
///
/// Surrounding whitespace and trailing slashes are removed and `http://`
/// is prepended when no scheme is present. A blank value yields
/// [`DEFAULT_ENGINE_URL`].
pub fn normalize_engine_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_ENGINE_URL.to_string();
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme_and_strips_slashes() {
        assert_eq!(normalize_engine_url("10.0.0.5:8188//"), "http://10.0.0.5:8188");
        assert_eq!(
            normalize_engine_url(" https://gpu.example.com/ "),
            "https://gpu.example.com"
        );
        assert_eq!(normalize_engine_url("http://host:8188"), "http://host:8188");
    }

    #[test]
    fn normalize_blank_uses_default() {
        assert_eq!(normalize_engine_url("   "), DEFAULT_ENGINE_URL);
    }

    #[test]
    fn prompt_mode_parse_is_lenient() {
        assert_eq!(PromptMode::parse("Structured"), PromptMode::Structured);
        assert_eq!(PromptMode::parse("normal"), PromptMode::Normal);
        assert_eq!(PromptMode::parse("bogus"), PromptMode::Normal);
    }

    #[test]
    fn preferences_fill_missing_fields() {
        let prefs: Preferences = serde_json::from_str(r#"{"prompt_mode":"structured"}"#).unwrap();
        assert_eq!(prefs.engine_url, DEFAULT_ENGINE_URL);
        assert_eq!(prefs.prompt_mode, PromptMode::Structured);
        assert_eq!(prefs.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(prefs.caption.is_empty());
    }

    #[test]
    fn set_engine_url_normalizes() {
        let mut prefs = Preferences::default();
        prefs.set_engine_url("gpu-box:8188/");
        assert_eq!(prefs.engine_url, "http://gpu-box:8188");
    }
}

//! Turning user input into submitted prompt text.

use studio_core::preferences::{Preferences, PromptMode};
use studio_core::structured_prompt::{build_final_prompt, decode};

/// The user's part of the prompt for the configured mode.
///
/// Normal text is used as typed. Structured text goes through the codec
/// so that it is submitted in canonical form; the configured caption is
/// used when the text carries none.
pub fn user_prompt(preferences: &Preferences, input: &str) -> String {
    match preferences.prompt_mode {
        PromptMode::Normal => input.trim().to_string(),
        PromptMode::Structured => {
            let mut structured = decode(input);
            if structured.caption.trim().is_empty() {
                structured.caption = preferences.caption.clone();
            }
            structured.encode()
        }
    }
}

/// The full text submitted to the engine, or `None` when the user part
/// is blank.
pub fn final_prompt(preferences: &Preferences, input: &str) -> Option<String> {
    let user = user_prompt(preferences, input);
    if user.trim().is_empty() {
        return None;
    }
    Some(build_final_prompt(&preferences.system_prompt, &user))
}

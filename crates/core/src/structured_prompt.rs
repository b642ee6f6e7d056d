//! Structured prompt codec.
//!
//! The generation model consumes prompts written in a small XML-like
//! dialect: one `<character_N>` block per character, an optional
//! `<general_tags>` block and an optional trailing `<caption>`. This
//! module converts between that text and the [`StructuredPrompt`]
//! record edited by the user.
//!
//! No escaping is performed. Angle brackets inside field values are not
//! supported and can corrupt block boundaries when decoded.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Gender assigned to characters created from scratch (not decoded).
pub const DEFAULT_GENDER: &str = "1girl";

/// Marker separating the instructional system prompt from the user prompt.
pub const PROMPT_START_MARKER: &str = "<Prompt Start>";

/// System prompt prepended to every submission unless overridden.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the greatest anime artist in the entire universe. \
Your figures are always clear, especially in facial detail. Your compositions always adhere to the golden ratio. \
Your perspectives are perfectly chosen. The scenes in your works always fit the setting. \
Your lighting is particularly atmospheric.Now draw a picture based on the prompts below.\
You are an assistant designed to generate anime images based on xml format textual prompts.";

/// Negative prompt used when the user leaves the field untouched.
pub const DEFAULT_NEGATIVE_PROMPT: &str =
    "low quality, blurry, distorted, deformed, ugly, bad anatomy";

/// Tag carrying a character's name. Kept short because the model was
/// trained on it.
const NAME_TAG: &str = "n";

static PROMPT_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<Prompt Start>[\s,]*").expect("valid regex"));

/// Accepts both `character_1` and `character 1`, case-insensitively.
static CHARACTER_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<character[_ ](\d+)>(.*?)</character[_ ]\d+>").expect("valid regex")
});

static GENERAL_TAGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<general[_ ]tags>(.*?)</general[_ ]tags>").expect("valid regex")
});

static CAPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<caption>(.*?)</caption>").expect("valid regex"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One character in a structured prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub gender: String,
    pub appearance: String,
    pub clothing: String,
    pub expression: String,
    pub action: String,
    pub position: String,
}

impl Character {
    /// A blank character as offered to the user for editing.
    pub fn new() -> Self {
        Self {
            gender: DEFAULT_GENDER.to_string(),
            ..Default::default()
        }
    }

    /// Every field except the name, in encoding order.
    fn detail_fields(&self) -> [(&'static str, &str); 6] {
        [
            ("gender", &self.gender),
            ("appearance", &self.appearance),
            ("clothing", &self.clothing),
            ("expression", &self.expression),
            ("action", &self.action),
            ("position", &self.position),
        ]
    }

    fn parse(block: &str) -> Self {
        Self {
            name: extract_tag(block, NAME_TAG),
            gender: extract_tag(block, "gender"),
            appearance: extract_tag(block, "appearance"),
            clothing: extract_tag(block, "clothing"),
            expression: extract_tag(block, "expression"),
            action: extract_tag(block, "action"),
            position: extract_tag(block, "position"),
        }
    }
}

/// Scene-wide tags shared by every character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralTags {
    pub count: String,
    pub artists: String,
    pub style: String,
    pub background: String,
    pub lighting: String,
    pub atmosphere: String,
    pub objects: String,
    pub other: String,
}

impl GeneralTags {
    /// True when no field carries anything but whitespace.
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, value)| value.trim().is_empty())
    }

    fn fields(&self) -> [(&'static str, &str); 8] {
        [
            ("count", &self.count),
            ("artists", &self.artists),
            ("style", &self.style),
            ("background", &self.background),
            ("lighting", &self.lighting),
            ("atmosphere", &self.atmosphere),
            ("objects", &self.objects),
            ("other", &self.other),
        ]
    }

    fn parse(block: &str) -> Self {
        Self {
            count: extract_tag(block, "count"),
            artists: extract_tag(block, "artists"),
            style: extract_tag(block, "style"),
            background: extract_tag(block, "background"),
            lighting: extract_tag(block, "lighting"),
            atmosphere: extract_tag(block, "atmosphere"),
            objects: extract_tag(block, "objects"),
            other: extract_tag(block, "other"),
        }
    }
}

/// The decoded form of a structured prompt.
///
/// `characters` is never empty after [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredPrompt {
    pub characters: Vec<Character>,
    pub general_tags: GeneralTags,
    pub caption: String,
}

impl StructuredPrompt {
    /// Encode this record with [`encode`].
    pub fn encode(&self) -> String {
        encode(&self.characters, &self.general_tags, &self.caption)
    }
}

impl Default for StructuredPrompt {
    fn default() -> Self {
        Self {
            characters: vec![Character::new()],
            general_tags: GeneralTags::default(),
            caption: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize characters, general tags and caption into tagged text.
///
/// Block and field order are fixed so the output is byte-for-byte
/// reproducible. Empty fields are omitted; a blank name becomes
/// `character_N`.
pub fn encode(characters: &[Character], general_tags: &GeneralTags, caption: &str) -> String {
    let mut out = String::new();

    for (index, character) in characters.iter().enumerate() {
        let number = index + 1;
        let name = match character.name.trim() {
            "" => format!("character_{number}"),
            name => name.to_string(),
        };

        out.push_str(&format!("<character_{number}>\n"));
        push_field(&mut out, NAME_TAG, &name);
        for (tag, value) in character.detail_fields() {
            if !value.is_empty() {
                push_field(&mut out, tag, value);
            }
        }
        out.push_str(&format!("</character_{number}>\n\n"));
    }

    if !general_tags.is_empty() {
        out.push_str("<general_tags>\n");
        for (tag, value) in general_tags.fields() {
            if !value.is_empty() {
                push_field(&mut out, tag, value);
            }
        }
        out.push_str("</general_tags>");
    }

    let caption = caption.trim();
    if !caption.is_empty() {
        out.push_str(&format!("\n\n<caption>{caption}</caption>"));
    }

    out.trim().to_string()
}

fn push_field(out: &mut String, tag: &str, value: &str) {
    out.push_str(&format!("<{tag}>{value}</{tag}>\n"));
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Parse tagged text back into a [`StructuredPrompt`].
///
/// Anything before a `<Prompt Start>` marker (the instructional system
/// prompt) is discarded. Text that is not part of a character or
/// general-tags block becomes the caption. When no character block is
/// present a single blank character is synthesized.
pub fn decode(text: &str) -> StructuredPrompt {
    let content = match PROMPT_START_RE.find(text) {
        Some(marker) => &text[marker.end()..],
        None => text,
    };

    let mut characters: Vec<Character> = CHARACTER_BLOCK_RE
        .captures_iter(content)
        .map(|caps| Character::parse(&caps[2]))
        .collect();

    if characters.is_empty() {
        characters.push(Character::new());
    }

    let general_tags = GENERAL_TAGS_RE
        .captures(content)
        .map(|caps| GeneralTags::parse(&caps[1]))
        .unwrap_or_default();

    let remainder = CHARACTER_BLOCK_RE.replace_all(content, "");
    let remainder = GENERAL_TAGS_RE.replace_all(&remainder, "");

    StructuredPrompt {
        characters,
        general_tags,
        caption: extract_caption(&remainder),
    }
}

/// Free text left over after block removal, with any `<caption>` wrapper
/// unwrapped. Loose text comes first, caption block contents after.
fn extract_caption(remainder: &str) -> String {
    let wrapped: Vec<String> = CAPTION_RE
        .captures_iter(remainder)
        .map(|caps| caps[1].trim().to_string())
        .filter(|inner| !inner.is_empty())
        .collect();

    let loose = CAPTION_RE.replace_all(remainder, "");
    let loose = loose.trim();

    let mut parts = Vec::with_capacity(wrapped.len() + 1);
    if !loose.is_empty() {
        parts.push(loose.to_string());
    }
    parts.extend(wrapped);
    parts.join("\n\n")
}

/// Inner text of the first `<tag>...</tag>` pair, trimmed; empty when
/// the tag is absent or unclosed.
fn extract_tag(block: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let Some(start) = block.find(&open) else {
        return String::new();
    };
    let body = &block[start + open.len()..];
    match body.find(&close) {
        Some(end) => body[..end].trim().to_string(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Submission text
// ---------------------------------------------------------------------------

/// Join the system prompt and the user's prompt into the text submitted
/// to the engine.
pub fn build_final_prompt(system_prompt: &str, user_prompt: &str) -> String {
    format!("{system_prompt}\n{PROMPT_START_MARKER},{user_prompt}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

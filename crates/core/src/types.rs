use serde::{Deserialize, Serialize};

/// Engine-assigned identifier for a queued generation job.
pub type PromptId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Descriptor of one image produced by the engine.
///
/// The triple is exactly what the engine's `/view` endpoint needs to
/// serve the file back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage-type tag, usually `output`.
    #[serde(rename = "type", default = "default_image_type")]
    pub image_type: String,
}

fn default_image_type() -> String {
    "output".to_string()
}

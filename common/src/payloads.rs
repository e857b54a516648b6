use crate::data::{AudioCodec, FormatKind, VideoContainer};
use serde::{Deserialize, Serialize};

// Response payloads

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ValidationResponse {
    pub valid: bool,
    /// Only present when `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResponse {
    pub fn valid() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

/// Body of every non-2xx JSON response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorPayload {
    pub kind: String,
    pub detail: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

// Request payloads

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UrlPayload {
    pub url: String,
}

fn default_quality() -> String {
    "720".to_string()
}

/// Query string of `GET /api/download`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DownloadQuery {
    pub url: String,
    #[serde(default)]
    pub format: FormatKind,
    /// Maximum vertical resolution. Ignored for audio.
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default)]
    pub audio_format: AudioCodec,
    #[serde(default)]
    pub video_format: VideoContainer,
    /// Title from an earlier metadata lookup, used as a filename hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

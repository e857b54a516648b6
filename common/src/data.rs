use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// Audio only; the engine extracts and transcodes the best audio stream.
    Audio,
    #[default]
    Video,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    #[default]
    Mp3,
    Aac,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoContainer {
    #[default]
    Mp4,
    Webm,
}

macro_rules! display_as_serde {
    ($($t:ty),*) => {$(
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match serde_json::to_value(self) {
                    Ok(serde_json::Value::String(s)) => f.write_str(&s),
                    _ => Err(fmt::Error),
                }
            }
        }
    )*};
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The engine is fetching bytes.
    Downloading,
    /// The engine finished fetching and is merging or transcoding.
    Processing,
    /// The job finished successfully. Terminal.
    Complete,
    /// The job failed. Terminal.
    Error,
}

display_as_serde!(FormatKind, AudioCodec, VideoContainer, Phase);

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }
}

/// Latest known progress of one job. This is also the wire shape of every
/// event on the progress stream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    /** Always within 0..=100 */
    pub percentage: f64,
    pub speed: String,
    pub eta: String,
    pub status: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressSnapshot {
    pub fn starting() -> Self {
        Self {
            percentage: 0.0,
            speed: String::new(),
            eta: String::new(),
            status: Phase::Downloading,
            message: None,
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self {
            percentage: 100.0,
            speed: String::new(),
            eta: String::new(),
            status: Phase::Processing,
            message: Some(message.into()),
        }
    }

    pub fn complete() -> Self {
        Self {
            percentage: 100.0,
            speed: String::new(),
            eta: String::new(),
            status: Phase::Complete,
            message: Some("Download complete!".to_string()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            percentage: 0.0,
            speed: String::new(),
            eta: String::new(),
            status: Phase::Error,
            message: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: String,
    /** Rendered as `{height}p`, e.g. `720p` */
    pub resolution: String,
    #[serde(default)]
    pub filesize: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    /** Seconds */
    pub duration: u64,
    pub thumbnail: String,
    pub uploader: String,
    pub formats: Vec<FormatInfo>,
}

//! The seam to the external extraction and download engine.
//!
//! Both calls block the calling thread for as long as the engine runs, so
//! callers must keep them off the request-handling threads (see
//! [`crate::runner::JobRunner`]).

use std::path::PathBuf;

use common::data::{AudioCodec, FormatInfo, FormatKind, VideoContainer, VideoMetadata};
use serde::Deserialize;

use crate::error::EngineError;

mod ytdlp;
pub use ytdlp::YtDlp;

#[cfg(test)]
pub mod testing;

const MAX_FORMATS: usize = 10;

/// One progress report from the engine, as it reports it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawStatus {
    /// `downloading`, `finished` or `error`. Other values are ignored.
    pub status: String,
    pub percent_str: Option<String>,
    pub speed_str: Option<String>,
    pub eta_str: Option<String>,
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    pub height: Option<u32>,
    pub filesize: Option<u64>,
}

/// What the engine knows about a URL before downloading anything.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

impl MediaInfo {
    /// Keeps only formats with a known height, at most ten of them.
    pub fn into_metadata(self) -> VideoMetadata {
        let formats = self
            .formats
            .into_iter()
            .filter_map(|f| {
                f.height.map(|h| FormatInfo {
                    format_id: f.format_id,
                    ext: f.ext,
                    resolution: format!("{h}p"),
                    filesize: f.filesize,
                })
            })
            .take(MAX_FORMATS)
            .collect();
        VideoMetadata {
            title: self.title.unwrap_or_else(|| "Unknown".to_string()),
            duration: self.duration.map(|d| d.max(0.0).round() as u64).unwrap_or(0),
            thumbnail: self.thumbnail.unwrap_or_default(),
            uploader: self.uploader.unwrap_or_else(|| "Unknown".to_string()),
            formats,
        }
    }
}

/// Everything the engine needs to run one job.
#[derive(Clone, Debug)]
pub struct DownloadSpec {
    pub url: String,
    /// Output path with an `%(ext)s` placeholder the engine fills in.
    pub output_template: PathBuf,
    pub format: FormatKind,
    pub quality: String,
    pub audio_codec: AudioCodec,
    pub video_container: VideoContainer,
}

pub trait Engine: Send + Sync + 'static {
    /// Resolves a URL without downloading it. `Ok(None)` means the engine
    /// ran but had nothing to say about the URL.
    fn extract(&self, url: &str) -> Result<Option<MediaInfo>, EngineError>;

    /// Downloads (and transcodes, for audio) into `spec.output_template`,
    /// calling `on_status` from the engine's own thread as it goes.
    fn download(&self, spec: &DownloadSpec, on_status: &dyn Fn(RawStatus)) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, height: Option<u32>) -> RawFormat {
        RawFormat {
            format_id: id.to_string(),
            ext: "mp4".to_string(),
            height,
            filesize: Some(1024),
        }
    }

    #[test]
    fn metadata_keeps_sized_formats_only() {
        let mut formats = vec![format("140", None), format("251", None)];
        formats.extend((0..15).map(|i| format(&i.to_string(), Some(144 + i))));
        let info = MediaInfo {
            title: Some("A talk".into()),
            duration: Some(212.6),
            thumbnail: Some("https://i.ytimg.com/vi/abc123/hq.jpg".into()),
            uploader: None,
            formats,
        };
        let meta = info.into_metadata();
        assert_eq!(meta.formats.len(), 10);
        assert_eq!(meta.formats[0].format_id, "0");
        assert_eq!(meta.formats[0].resolution, "144p");
        assert_eq!(meta.duration, 213);
        assert_eq!(meta.uploader, "Unknown");
    }

    #[test]
    fn metadata_parses_engine_json() {
        let json = r#"{
            "title": "Clip", "duration": 30, "uploader": "someone",
            "thumbnail": "https://example.com/t.jpg", "webpage_url": "ignored",
            "formats": [{"format_id": "22", "ext": "mp4", "height": 720, "filesize": null}]
        }"#;
        let meta = serde_json::from_str::<MediaInfo>(json).unwrap().into_metadata();
        assert_eq!(meta.title, "Clip");
        assert_eq!(meta.duration, 30);
        assert_eq!(meta.formats[0].resolution, "720p");
        assert_eq!(meta.formats[0].filesize, None);
    }
}

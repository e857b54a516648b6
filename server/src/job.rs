use std::path::PathBuf;

use chrono::{DateTime, Utc};
use common::{
    data::{AudioCodec, FormatKind, VideoContainer},
    is_supported_url,
    payloads::DownloadQuery,
};

use crate::{engine::DownloadSpec, error::ApiError, files::OutputAllocator};

/// One accepted download request.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: String,
    pub target_url: String,
    pub format_kind: FormatKind,
    pub quality_spec: String,
    pub audio_codec: AudioCodec,
    pub video_container: VideoContainer,
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Validates the request and allocates the job's output path. A rejected
    /// request allocates nothing.
    pub fn accept(query: DownloadQuery, allocator: &OutputAllocator) -> Result<Self, ApiError> {
        if !is_supported_url(&query.url) {
            return Err(ApiError::MalformedInput);
        }
        // spliced into the engine's format selector, so only a bare height
        if query.format == FormatKind::Video && !is_height(&query.quality) {
            return Err(ApiError::InvalidQuality(query.quality));
        }
        let output_path = allocator.allocate(query.format, query.title.as_deref());
        Ok(Self {
            id: uuidv7::create(),
            target_url: query.url,
            format_kind: query.format,
            quality_spec: query.quality,
            audio_codec: query.audio_format,
            video_container: query.video_format,
            output_path,
            created_at: Utc::now(),
        })
    }

    pub fn download_spec(&self) -> DownloadSpec {
        DownloadSpec {
            url: self.target_url.clone(),
            output_template: self.output_path.clone(),
            format: self.format_kind,
            quality: self.quality_spec.clone(),
            audio_codec: self.audio_codec,
            video_container: self.video_container,
        }
    }
}

fn is_height(quality: &str) -> bool {
    (1..=5).contains(&quality.len()) && quality.bytes().all(|b| b.is_ascii_digit())
}

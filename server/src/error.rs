use std::io;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use common::payloads::ErrorPayload;
use thiserror::Error;

/// Best-effort reading of the engine's error text. The engine's wording is
/// not stable, so anything unrecognised lands in `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionKind {
    RegionBlocked,
    Private,
    Removed,
    Unknown,
}

impl ExtractionKind {
    pub fn classify(engine_text: &str) -> Self {
        let lower = engine_text.to_lowercase();
        if lower.contains("geo") {
            Self::RegionBlocked
        } else if lower.contains("private") {
            Self::Private
        } else if lower.contains("removed") {
            Self::Removed
        } else {
            Self::Unknown
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::RegionBlocked => "Video not available in your region",
            Self::Private => "Video is private",
            Self::Removed => "Video has been removed",
            Self::Unknown => "Could not access video",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not run the engine: {0}")]
    Io(#[from] io::Error),
    /// The engine ran and reported a failure. Holds its error text.
    #[error("{0}")]
    Failed(String),
    #[error("unreadable engine output: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid YouTube URL")]
    MalformedInput,
    #[error("Invalid quality {0:?}: expected a height such as 720")]
    InvalidQuality(String),
    #[error("{}", .kind.message())]
    Extraction { kind: ExtractionKind, detail: String },
    #[error("Video not found")]
    NotFound,
    #[error("{0}")]
    Engine(String),
    #[error("{0}")]
    Unexpected(String),
}

impl ApiError {
    /// Maps a failed extraction call onto the taxonomy. Only errors reported
    /// by the engine itself are classified; anything else is unexpected.
    pub fn from_extraction(err: EngineError) -> Self {
        match err {
            EngineError::Failed(detail) => Self::Extraction {
                kind: ExtractionKind::classify(&detail),
                detail,
            },
            other => Self::Unexpected(other.to_string()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput | Self::InvalidQuality(_) => "malformed_input",
            Self::Extraction { .. } => "extraction_failure",
            Self::NotFound => "not_found",
            Self::Engine(_) => "engine_failure",
            Self::Unexpected(_) => "unexpected",
        }
    }

    /// Text carried by the terminal `error` event of a progress stream.
    pub fn stream_message(&self) -> String {
        match self {
            Self::Unexpected(e) => format!("Download failed: {e}"),
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedInput | Self::InvalidQuality(_) | Self::Extraction { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Engine(_) => StatusCode::BAD_GATEWAY,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorPayload {
            kind: self.kind().to_string(),
            detail: self.to_string(),
        })
    }
}

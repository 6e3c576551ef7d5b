// src/models/mod.rs

pub mod api;

use crate::error::AppError;
use crate::symbols;
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A downloadable audiobook as persisted in `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_path: Option<String>,
}

impl Book {
    /// A book known only by id; the pipeline fetches the rest.
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: id.to_string(),
            author: String::new(),
            chapters: Vec::new(),
            cover_path: None,
        }
    }

    pub fn has_cover(&self) -> bool {
        self.cover_path.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    /// Library item used to open the playback session for the whole book.
    pub fn library_item_id(&self) -> Option<&str> {
        self.chapters
            .first()
            .map(|c| c.library_item_id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub start: f64,
    pub end: f64,
    pub library_item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub index: u32,
    #[serde(default)]
    pub content_url: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSession {
    pub id: String,
    #[serde(default)]
    pub audio_tracks: Vec<AudioTrack>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub library_item_id: String,
    #[serde(default)]
    pub episode_id: Option<String>,
}

/// Technical manifest of what was physically written for a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub audio_track_count: u32,
    pub download_date: DateTime<Utc>,
}

impl AudioInfo {
    pub fn new(audio_track_count: u32) -> Self {
        Self {
            audio_track_count,
            download_date: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ValidationResult::Invalid(reason.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStage {
    Preparing,
    FetchingMetadata,
    DownloadingCover,
    DownloadingAudio,
    Finalizing,
    Complete,
    Failed,
}

impl DownloadStage {
    pub fn label(&self) -> &'static str {
        match self {
            DownloadStage::Preparing => "Preparing download",
            DownloadStage::FetchingMetadata => "Fetching book details",
            DownloadStage::DownloadingCover => "Downloading cover",
            DownloadStage::DownloadingAudio => "Downloading audio",
            DownloadStage::Finalizing => "Verifying download",
            DownloadStage::Complete => "Download complete",
            DownloadStage::Failed => "Download failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStage::Complete | DownloadStage::Failed)
    }

    pub fn get_display_info(
        &self,
    ) -> (
        &'static ColoredString,
        fn(ColoredString) -> ColoredString,
    ) {
        match self {
            DownloadStage::Complete => (&symbols::OK, |s| s.green()),
            DownloadStage::Failed => (&symbols::ERROR, |s| s.red()),
            _ => (&symbols::INFO, |s| s.cyan()),
        }
    }
}

impl fmt::Display for DownloadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub book_id: String,
    pub progress: f64,
    pub message: String,
    pub stage: DownloadStage,
}

impl DownloadProgress {
    pub fn new(book_id: &str, progress: f64, message: impl Into<String>, stage: DownloadStage) -> Self {
        Self {
            book_id: book_id.to_string(),
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            stage,
        }
    }
}

/// Coarse outcome of a finished download, used for the batch report.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DownloadStatus {
    Success,
    Skipped,
    Cancelled,
    VerificationFailed,
    HttpError,
    NetworkError,
    TimeoutError,
    TokenError,
    StorageError,
    IoError,
    UnexpectedError,
}

impl DownloadStatus {
    pub fn get_display_info(
        &self,
    ) -> (
        &'static ColoredString,
        fn(ColoredString) -> ColoredString,
        &'static str,
    ) {
        match self {
            DownloadStatus::Success => (&symbols::OK, |s| s.green(), "Downloaded and verified"),
            DownloadStatus::Skipped => (&symbols::INFO, |s| s.cyan(), "Already downloaded, skipped"),
            DownloadStatus::Cancelled => (&symbols::WARN, |s| s.yellow(), "Cancelled"),
            DownloadStatus::VerificationFailed => {
                (&symbols::ERROR, |s| s.red(), "Verification failed")
            }
            DownloadStatus::HttpError => (&symbols::ERROR, |s| s.red(), "Server returned an error"),
            DownloadStatus::NetworkError => (&symbols::ERROR, |s| s.red(), "Network request failed"),
            DownloadStatus::TimeoutError => (&symbols::WARN, |s| s.yellow(), "Network timeout"),
            DownloadStatus::TokenError => (&symbols::ERROR, |s| s.red(), "Authentication failed"),
            DownloadStatus::StorageError => (&symbols::ERROR, |s| s.red(), "Not enough free space"),
            DownloadStatus::IoError => (&symbols::ERROR, |s| s.red(), "Local file error"),
            DownloadStatus::UnexpectedError => {
                (&symbols::ERROR, |s| s.red(), "Unexpected error")
            }
        }
    }
}

impl From<&AppError> for DownloadStatus {
    fn from(error: &AppError) -> Self {
        match error {
            AppError::TokenInvalid | AppError::TokenMissing => DownloadStatus::TokenError,
            AppError::Network(err)
            | AppError::NetworkMiddleware(reqwest_middleware::Error::Reqwest(err)) => {
                if err.is_timeout() {
                    DownloadStatus::TimeoutError
                } else if err.is_status() {
                    DownloadStatus::HttpError
                } else {
                    DownloadStatus::NetworkError
                }
            }
            AppError::NetworkMiddleware(_) => DownloadStatus::NetworkError,
            AppError::HttpError(_) | AppError::InvalidResponse | AppError::FileTooSmall(_) => {
                DownloadStatus::HttpError
            }
            AppError::CoverDownloadFailed(inner) => DownloadStatus::from(inner.as_ref()),
            AppError::Io(_) | AppError::TempFilePersist(_) => DownloadStatus::IoError,
            AppError::VerificationFailed(_) => DownloadStatus::VerificationFailed,
            AppError::InsufficientStorage { .. } => DownloadStatus::StorageError,
            AppError::AlreadyDownloading(_) => DownloadStatus::Skipped,
            AppError::Cancelled | AppError::UserInterrupt => DownloadStatus::Cancelled,
            _ => DownloadStatus::UnexpectedError,
        }
    }
}

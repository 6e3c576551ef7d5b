// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed (token invalid or expired)")]
    TokenInvalid,
    #[error("No access token available, cannot talk to the server")]
    TokenMissing,
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Network middleware error: {0}")]
    NetworkMiddleware(#[from] reqwest_middleware::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to persist temporary file: {0}")]
    TempFilePersist(#[from] tempfile::PersistError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse API response from '{url}': {source}")]
    ApiParseFailed {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    // --- download pipeline ---
    #[error("Server returned an invalid response")]
    InvalidResponse,
    #[error("Server responded with HTTP {0}")]
    HttpError(u16),
    #[error("Downloaded payload is too small ({0} bytes)")]
    FileTooSmall(usize),
    #[error("Downloaded cover is not a recognised image")]
    InvalidImageData,
    #[error("Book has no chapters, no library item id to request a playback session")]
    MissingLibraryItemId,
    #[error("Audio track {track} has no content URL")]
    MissingContentUrl { track: u32 },
    #[error("Cannot build a download URL for audio path '{0}'")]
    InvalidAudioUrl(String),
    #[error("Cover download failed: {0}")]
    CoverDownloadFailed(#[source] Box<AppError>),
    #[error("Downloaded book failed verification: {0}")]
    VerificationFailed(String),
    #[error("Not enough free space (required {required} bytes, available {available} bytes)")]
    InsufficientStorage { required: u64, available: u64 },
    #[error("Book '{0}' is already being downloaded")]
    AlreadyDownloading(String),
    #[error("Download cancelled")]
    Cancelled,

    #[error("Security error: {0}")]
    Security(String),
    #[error("Interrupted by user")]
    UserInterrupt,
    #[error("{0}")]
    UserInputError(String),
    #[error("Unexpected error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

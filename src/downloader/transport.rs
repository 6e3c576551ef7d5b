// src/downloader/transport.rs

use crate::{
    client::RobustClient,
    constants,
    error::*,
    models::{PlaybackSession, api::PlaybackSessionRequest},
    utils,
};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info};
use reqwest::{Method, StatusCode};
use url::Url;

/// Byte-level access to the server used by the download pipeline.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    async fn download_file(&self, url: &Url, token: &str) -> AppResult<Vec<u8>>;
    async fn download_cover(&self, book_id: &str) -> AppResult<Vec<u8>>;
    async fn create_playback_session(&self, library_item_id: &str) -> AppResult<PlaybackSession>;

    /// Server root that relative track content paths are resolved against.
    fn base_url(&self) -> &Url;
    fn token(&self) -> &str;
}

/// Image container detected from the leading bytes of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
}

pub fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(ImageFormat::Png),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(ImageFormat::WebP),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(ImageFormat::Gif),
        _ => None,
    }
}

pub struct HttpTransport {
    http: RobustClient,
}

/// Buffer size to reserve for a body; the server's Content-Length is only a hint.
fn capacity_hint(content_length: Option<u64>) -> usize {
    content_length
        .unwrap_or(0)
        .min(constants::limits::MAX_PREALLOCATED_BYTES) as usize
}

impl HttpTransport {
    pub fn new(http: RobustClient) -> Self {
        Self { http }
    }

    async fn get_bytes(&self, url: &Url, token: &str) -> AppResult<Vec<u8>> {
        let mut request = self
            .http
            .client
            .get(url.clone())
            .timeout(self.http.config().file_timeout);
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }
        let res = request.send().await?;
        let status = res.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(AppError::TokenInvalid);
        }
        if status != StatusCode::OK {
            return Err(AppError::HttpError(status.as_u16()));
        }

        let mut body = Vec::with_capacity(capacity_hint(res.content_length()));
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        if body.len() < constants::limits::MIN_DOWNLOAD_BYTES {
            return Err(AppError::FileTooSmall(body.len()));
        }
        Ok(body)
    }
}

#[async_trait]
impl NetworkTransport for HttpTransport {
    async fn download_file(&self, url: &Url, token: &str) -> AppResult<Vec<u8>> {
        debug!("GET {}", url);
        let bytes = self.get_bytes(url, token).await?;
        debug!("Downloaded {} bytes from {}", bytes.len(), url.path());
        Ok(bytes)
    }

    async fn download_cover(&self, book_id: &str) -> AppResult<Vec<u8>> {
        let url = self
            .http
            .endpoint(&utils::fill_template(constants::api::COVER_PATH, &[("id", book_id)]))?;
        let bytes = self.download_file(&url, &self.http.config().token).await?;
        match sniff_image_format(&bytes) {
            Some(format) => {
                debug!("Cover for '{}' is {:?} ({} bytes)", book_id, format, bytes.len());
                Ok(bytes)
            }
            None => Err(AppError::InvalidImageData),
        }
    }

    async fn create_playback_session(&self, library_item_id: &str) -> AppResult<PlaybackSession> {
        let url = self.http.endpoint(&utils::fill_template(
            constants::api::PLAY_PATH,
            &[("id", library_item_id)],
        ))?;
        let payload = PlaybackSessionRequest::for_device(&self.http.config().device_id);
        let res = self
            .http
            .request(Method::POST, url.clone(), self.http.config().timeout)
            .json(&payload)
            .send()
            .await?;
        match res.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(AppError::TokenInvalid),
            other => {
                debug!("Playback session request returned {}", other);
                return Err(AppError::InvalidResponse);
            }
        }
        let body = res.text().await?;
        let session: PlaybackSession =
            serde_json::from_str(&body).map_err(|source| AppError::ApiParseFailed {
                url: url.to_string(),
                source,
            })?;
        info!(
            "Opened playback session {} for item {} ({} tracks)",
            session.id,
            library_item_id,
            session.audio_tracks.len()
        );
        Ok(session)
    }

    fn base_url(&self) -> &Url {
        self.http.base_url()
    }

    fn token(&self) -> &str {
        &self.http.config().token
    }
}

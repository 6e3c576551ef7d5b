// src/models/api.rs

use super::{Book, Chapter};
use crate::constants;
use serde::{Deserialize, Serialize};

// --- library item (GET /api/items/{id}?expanded=1) ---

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItemResponse {
    pub id: String,
    pub media: MediaResponse,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MediaResponse {
    #[serde(default)]
    pub metadata: MediaMetadata,
    #[serde(default)]
    pub cover_path: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterResponse>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub authors: Vec<AuthorResponse>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AuthorResponse {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChapterResponse {
    pub id: serde_json::Value,
    #[serde(default)]
    pub title: String,
    pub start: f64,
    pub end: f64,
}

impl LibraryItemResponse {
    pub fn into_book(self) -> Book {
        let MediaResponse {
            metadata,
            cover_path,
            chapters,
        } = self.media;

        let author = metadata.author_name.filter(|a| !a.is_empty()).unwrap_or_else(|| {
            metadata
                .authors
                .iter()
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        });

        let item_id = self.id;
        let chapters = chapters
            .into_iter()
            .map(|c| Chapter {
                // chapter ids arrive as numbers or strings depending on server version
                id: match c.id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
                title: c.title,
                start: c.start,
                end: c.end,
                library_item_id: item_id.clone(),
                episode_id: None,
            })
            .collect();

        Book {
            title: metadata.title.unwrap_or_else(|| item_id.clone()),
            id: item_id,
            author,
            chapters,
            cover_path: cover_path.filter(|p| !p.is_empty()),
        }
    }
}

// --- playback session (POST /api/items/{id}/play) ---

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSessionRequest {
    pub device_info: DeviceInfo,
    pub force_direct_play: bool,
    pub force_transcode: bool,
    pub supported_mime_types: Vec<String>,
    pub media_player: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub client_name: String,
    pub client_version: String,
    pub manufacturer: String,
    pub model: String,
}

impl PlaybackSessionRequest {
    pub fn for_device(device_id: &str) -> Self {
        Self {
            device_info: DeviceInfo {
                device_id: device_id.to_string(),
                client_name: constants::api::CLIENT_NAME.to_string(),
                client_version: clap::crate_version!().to_string(),
                manufacturer: std::env::consts::OS.to_string(),
                model: std::env::consts::ARCH.to_string(),
            },
            force_direct_play: true,
            force_transcode: false,
            supported_mime_types: constants::api::SUPPORTED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            media_player: constants::api::MEDIA_PLAYER.to_string(),
        }
    }
}

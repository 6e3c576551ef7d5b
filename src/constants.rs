// src/constants.rs

pub const UI_WIDTH: usize = 88;
pub const TITLE_TRUNCATE_LENGTH: usize = 60;
pub const CONFIG_DIR_NAME: &str = concat!(".", clap::crate_name!());
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const LOG_FILE_NAME: &str = "app.log";
pub const LOG_FALLBACK_FILE_NAME: &str = "fallback.log";
pub const DEFAULT_DOWNLOADS_DIR: &str = "Downloads";
/// Only used by local modes when no server is configured.
pub const PLACEHOLDER_SERVER_URL: &str = "http://localhost:13378";
pub const TOKEN_ENV_VAR: &str = "SHELF_DL_TOKEN";
pub const USER_AGENT: &str = concat!(clap::crate_name!(), "/", clap::crate_version!());

/// Free space demanded before a download is started.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 500 * 1024 * 1024;

pub mod layout {
    pub const METADATA_FILE: &str = "metadata.json";
    pub const AUDIO_INFO_FILE: &str = "audio_info.json";
    pub const COVER_FILE: &str = "cover.jpg";
    pub const AUDIO_DIR: &str = "audio";

    pub fn audio_file_name(index: u32) -> String {
        format!("chapter_{index}.mp3")
    }
}

pub mod limits {
    /// Anything shorter is treated as an error page served with 200.
    pub const MIN_DOWNLOAD_BYTES: usize = 1024;
    pub const MIN_AUDIO_FILE_BYTES: u64 = 10 * 1024;
    pub const MIN_COVER_FILE_BYTES: u64 = 1024;
    /// Upper bound on the buffer reserved from a response's Content-Length.
    pub const MAX_PREALLOCATED_BYTES: u64 = 64 * 1024 * 1024;
}

pub mod network {
    pub const CONTROL_TIMEOUT_SECS: u64 = 30;
    pub const FILE_TIMEOUT_SECS: u64 = 300;
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 2;
    pub const METADATA_RETRY_COUNT: u32 = 3;
    pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];
}

pub mod healing {
    pub const SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;
    pub const SETTLE_DELAY_SECS: u64 = 10;
    pub const RECONNECT_DEBOUNCE_SECS: u64 = 3;
    pub const PROBE_INTERVAL_SECS: u64 = 15;
}

/// Fixed progress weights of the pipeline stages.
pub mod progress {
    pub const PREPARING: f64 = 0.05;
    pub const FETCHING_METADATA: f64 = 0.10;
    pub const METADATA_SAVED: f64 = 0.15;
    pub const DOWNLOADING_COVER: f64 = 0.20;
    pub const AUDIO_START: f64 = 0.25;
    pub const AUDIO_SPAN: f64 = 0.70;
    pub const FINALIZING: f64 = 0.95;
    pub const COMPLETE: f64 = 1.0;
}

pub mod api {
    pub const ITEM_PATH: &str = "/api/items/{id}";
    pub const PLAY_PATH: &str = "/api/items/{id}/play";
    pub const COVER_PATH: &str = "/api/items/{id}/cover";
    pub const PING_PATH: &str = "/ping";
    pub const CLIENT_NAME: &str = clap::crate_name!();
    pub const MEDIA_PLAYER: &str = "offline";
    pub const SUPPORTED_MIME_TYPES: [&str; 4] =
        ["audio/mpeg", "audio/mp4", "audio/aac", "audio/flac"];
}

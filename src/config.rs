// src/config.rs

pub mod token;

use self::token::load_or_create_external_config;
use crate::{
    cli::Cli,
    constants,
    error::{AppError, AppResult},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub file_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_secs: Option<u64>,
    pub metadata_retry_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DownloadsConfig {
    pub directory: Option<PathBuf>,
    pub min_free_bytes: Option<u64>,
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealingFileConfig {
    pub interval_secs: Option<u64>,
    pub settle_delay_secs: Option<u64>,
    pub reconnect_debounce_secs: Option<u64>,
    pub probe_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExternalConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accesstoken: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub healing: HealingFileConfig,
}

impl ExternalConfig {
    pub(crate) fn default_app_config() -> Self {
        Self {
            server_url: None,
            accesstoken: None,
            device_id: Some(format!("{}-{}", constants::api::CLIENT_NAME, std::process::id())),
            network: NetworkConfig {
                connect_timeout_secs: Some(constants::network::CONNECT_TIMEOUT_SECS),
                timeout_secs: Some(constants::network::CONTROL_TIMEOUT_SECS),
                file_timeout_secs: Some(constants::network::FILE_TIMEOUT_SECS),
                max_retries: Some(constants::network::DEFAULT_MAX_RETRIES),
                retry_base_delay_secs: Some(constants::network::DEFAULT_RETRY_BASE_DELAY_SECS),
                metadata_retry_count: Some(constants::network::METADATA_RETRY_COUNT),
            },
            downloads: DownloadsConfig {
                directory: None,
                min_free_bytes: Some(constants::DEFAULT_MIN_FREE_BYTES),
                max_workers: Some(2),
            },
            healing: HealingFileConfig {
                interval_secs: Some(constants::healing::SWEEP_INTERVAL_SECS),
                settle_delay_secs: Some(constants::healing::SETTLE_DELAY_SECS),
                reconnect_debounce_secs: Some(constants::healing::RECONNECT_DEBOUNCE_SECS),
                probe_interval_secs: Some(constants::healing::PROBE_INTERVAL_SECS),
            },
        }
    }
}

/// Timing of the background healing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealingSettings {
    pub interval: Duration,
    pub settle_delay: Duration,
    pub reconnect_debounce: Duration,
    pub probe_interval: Duration,
}

impl Default for HealingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(constants::healing::SWEEP_INTERVAL_SECS),
            settle_delay: Duration::from_secs(constants::healing::SETTLE_DELAY_SECS),
            reconnect_debounce: Duration::from_secs(constants::healing::RECONNECT_DEBOUNCE_SECS),
            probe_interval: Duration::from_secs(constants::healing::PROBE_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_url: Url,
    pub token: String,
    pub device_id: String,
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub file_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub metadata_retry_count: u32,
    pub downloads_dir: PathBuf,
    pub min_free_bytes: u64,
    pub max_workers: usize,
    pub healing: HealingSettings,
}

impl AppConfig {
    pub fn new(args: &Cli, token: String) -> AppResult<Self> {
        let external_config = load_or_create_external_config()?;
        Self::from_parts(args, external_config, token)
    }

    pub fn from_parts(args: &Cli, external: ExternalConfig, token: String) -> AppResult<Self> {
        let server = match args.server.clone().or(external.server_url) {
            Some(server) => server,
            None if !args.needs_server() => constants::PLACEHOLDER_SERVER_URL.to_string(),
            None => {
                return Err(AppError::UserInputError(
                    "No server URL configured. Pass --server or set \"server_url\" in the config file."
                        .to_string(),
                ));
            }
        };
        let server_url = Url::parse(&server)?;

        let network = external.network;
        let healing = external.healing;
        let defaults = HealingSettings::default();

        Ok(Self {
            server_url,
            token,
            device_id: external
                .device_id
                .unwrap_or_else(|| constants::api::CLIENT_NAME.to_string()),
            user_agent: constants::USER_AGENT.into(),
            connect_timeout: Duration::from_secs(
                network
                    .connect_timeout_secs
                    .unwrap_or(constants::network::CONNECT_TIMEOUT_SECS),
            ),
            timeout: Duration::from_secs(
                network.timeout_secs.unwrap_or(constants::network::CONTROL_TIMEOUT_SECS),
            ),
            file_timeout: Duration::from_secs(
                network
                    .file_timeout_secs
                    .unwrap_or(constants::network::FILE_TIMEOUT_SECS),
            ),
            max_retries: network.max_retries.unwrap_or(constants::network::DEFAULT_MAX_RETRIES),
            retry_base_delay: Duration::from_secs(
                network
                    .retry_base_delay_secs
                    .unwrap_or(constants::network::DEFAULT_RETRY_BASE_DELAY_SECS),
            ),
            metadata_retry_count: network
                .metadata_retry_count
                .unwrap_or(constants::network::METADATA_RETRY_COUNT),
            downloads_dir: args
                .output
                .clone()
                .or(external.downloads.directory)
                .unwrap_or_else(default_downloads_dir),
            min_free_bytes: external
                .downloads
                .min_free_bytes
                .unwrap_or(constants::DEFAULT_MIN_FREE_BYTES),
            max_workers: args
                .workers
                .or(external.downloads.max_workers)
                .unwrap_or(2)
                .max(1),
            healing: HealingSettings {
                interval: healing
                    .interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.interval),
                settle_delay: healing
                    .settle_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.settle_delay),
                reconnect_debounce: healing
                    .reconnect_debounce_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.reconnect_debounce),
                probe_interval: healing
                    .probe_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.probe_interval),
            },
        })
    }
}

fn default_downloads_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(clap::crate_name!()).join(constants::DEFAULT_DOWNLOADS_DIR))
        .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_DOWNLOADS_DIR))
}

#[cfg(feature = "testing")]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse("http://127.0.0.1:13378").expect("static url"),
            token: "test-token".to_string(),
            device_id: "test-device".to_string(),
            user_agent: "test-agent/1.0".to_string(),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
            file_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(10),
            metadata_retry_count: 0,
            downloads_dir: PathBuf::from(constants::DEFAULT_DOWNLOADS_DIR),
            min_free_bytes: 0,
            max_workers: 2,
            healing: HealingSettings::default(),
        }
    }
}

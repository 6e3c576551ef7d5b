// src/config/token.rs

use crate::{
    config::ExternalConfig,
    constants,
    error::{AppError, AppResult},
};
use anyhow::{Context, anyhow};
use log::{debug, info};
use std::{fs, path::PathBuf};

/// Overrides the config directory, mostly so tests stay out of `$HOME`.
pub const CONFIG_DIR_ENV: &str = "SHELF_DL_CONFIG_DIR";

pub(crate) fn get_config_dir() -> AppResult<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) && !dir.is_empty() {
        return Ok(PathBuf::from(dir));
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| AppError::Other(anyhow!("Cannot determine the user's home directory")))?
        .join(constants::CONFIG_DIR_NAME))
}

pub(super) fn get_config_path() -> AppResult<PathBuf> {
    Ok(get_config_dir()?.join(constants::CONFIG_FILE_NAME))
}

pub(crate) fn load_or_create_external_config() -> AppResult<ExternalConfig> {
    let config_path = get_config_path()?;
    if config_path.is_file() {
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file '{}'", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", config_path.display()))
            .map_err(AppError::from)
    } else {
        info!("Config file {:?} does not exist, creating defaults.", config_path);
        let config = ExternalConfig::default_app_config();

        if let Some(dir) = config_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let json_content = serde_json::to_string_pretty(&config)?;
        fs::write(&config_path, json_content)?;

        Ok(config)
    }
}

pub fn save_token(token: &str) -> AppResult<()> {
    if token.is_empty() {
        return Ok(());
    }

    let config_path = get_config_path()?;
    let mut config = load_or_create_external_config()?;

    config.accesstoken = Some(token.to_string());

    let json_content = serde_json::to_string_pretty(&config)?;
    fs::write(&config_path, json_content)
        .with_context(|| format!("Failed to save token to '{}'", config_path.display()))?;

    info!("Token saved to config file: {}", config_path.display());
    println!(
        "{} Token saved to: {}",
        *crate::symbols::INFO,
        config_path.display()
    );

    Ok(())
}

pub fn load_token_from_config() -> Option<String> {
    load_or_create_external_config()
        .ok()
        .and_then(|config| config.accesstoken)
}

pub fn resolve_token(cli_token: Option<&str>) -> (Option<String>, String) {
    if let Some(token) = cli_token && !token.is_empty() {
        debug!("Using token from command line");
        return (Some(token.to_string()), "command line".to_string());
    }
    if let Ok(token) = std::env::var(constants::TOKEN_ENV_VAR) && !token.is_empty() {
        debug!("Using token from environment variable {}", constants::TOKEN_ENV_VAR);
        return (
            Some(token),
            format!("environment ({})", constants::TOKEN_ENV_VAR),
        );
    }
    if let Some(token) = load_token_from_config() && !token.is_empty() {
        debug!("Using token from config file");
        return (Some(token), "config file".to_string());
    }
    debug!("No token found anywhere");
    (None, "not found".to_string())
}

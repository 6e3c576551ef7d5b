// src/client.rs

use crate::{
    config::AppConfig,
    constants,
    error::*,
    models::{Book, api::LibraryItemResponse},
    utils,
};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Method, RequestBuilder, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use url::Url;

/// Remote metadata lookups consumed by the download pipeline.
#[async_trait]
pub trait BookApi: Send + Sync {
    /// Full book details, retried up to `retry_count` times on transient
    /// failures independently of the pipeline's own retry policy.
    async fn fetch_book_details(&self, book_id: &str, retry_count: u32) -> AppResult<Book>;
}

/// Authenticated HTTP access to the audiobook server.
#[derive(Clone)]
pub struct RobustClient {
    pub client: reqwest::Client,
    config: Arc<AppConfig>,
}

impl RobustClient {
    pub fn new(config: Arc<AppConfig>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_workers * 2)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn base_url(&self) -> &Url {
        &self.config.server_url
    }

    /// Absolute URL for an API path such as `/api/items/{id}`.
    pub fn endpoint(&self, path: &str) -> AppResult<Url> {
        let base = self.config.server_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    /// A request carrying the bearer token and the given timeout.
    pub fn request(&self, method: Method, url: Url, timeout: Duration) -> RequestBuilder {
        let builder = self.client.request(method, url).timeout(timeout);
        if self.config.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.config.token)
        }
    }

    /// Same client wrapped in `reqwest-retry`, used for metadata calls that
    /// carry their own retry budget.
    pub fn with_retries(&self, max_retries: u32) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        ClientBuilder::new(self.client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    pub async fn fetch_json<T: DeserializeOwned>(&self, url: Url, max_retries: u32) -> AppResult<T> {
        let mut builder = self
            .with_retries(max_retries)
            .get(url.clone())
            .timeout(self.config.timeout);
        if !self.config.token.is_empty() {
            builder = builder.bearer_auth(&self.config.token);
        }
        let res = builder.send().await?;
        if res.status() == StatusCode::UNAUTHORIZED || res.status() == StatusCode::FORBIDDEN {
            return Err(AppError::TokenInvalid);
        }
        let res = res.error_for_status()?;
        let body = res.text().await?;
        serde_json::from_str(&body).map_err(|source| AppError::ApiParseFailed {
            url: url.to_string(),
            source,
        })
    }
}

/// `BookApi` backed by the server's REST interface.
#[derive(Clone)]
pub struct RemoteApi {
    http: RobustClient,
}

impl RemoteApi {
    pub fn new(http: RobustClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl BookApi for RemoteApi {
    async fn fetch_book_details(&self, book_id: &str, retry_count: u32) -> AppResult<Book> {
        let mut url = self
            .http
            .endpoint(&utils::fill_template(constants::api::ITEM_PATH, &[("id", book_id)]))?;
        url.query_pairs_mut().append_pair("expanded", "1");
        debug!("Fetching book details: {}", url);
        let item: LibraryItemResponse = self.http.fetch_json(url, retry_count).await?;
        let book = item.into_book();
        info!(
            "Fetched details for '{}' ({} chapters, cover: {})",
            book.title,
            book.chapters.len(),
            book.has_cover()
        );
        Ok(book)
    }
}

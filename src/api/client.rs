//! HTTP client for the hospital backend's notification endpoints.

use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::models::{Ack, NotificationPage};

/// Failure of a backend call.
///
/// `Clone` because a single coalesced request hands its result to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Request rejected by backend: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Backend operations the notification store depends on.
#[async_trait]
pub trait NotificationsApi: Send + Sync {
    /// Identifies the authenticated session this client talks for.
    ///
    /// Requests are coalesced process-wide per scope, so two clients for the
    /// same user on the same backend share their first-page fetch.
    fn scope(&self) -> String;

    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<NotificationPage, ApiError>;

    async fn mark_read(&self, id: &str) -> Result<(), ApiError>;

    async fn mark_all_read(&self) -> Result<(), ApiError>;

    async fn delete(&self, id: &str) -> Result<(), ApiError>;

    async fn clear_all(&self) -> Result<(), ApiError>;
}

/// reqwest-backed implementation of [`NotificationsApi`].
pub struct HttpNotificationsApi {
    client: Client,
    base_url: String,
    token: String,
    user_id: String,
}

impl HttpNotificationsApi {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - Base URL of the backend API (e.g., "https://hms.example.org/api")
    /// * `token` - Bearer token attached to every request
    /// * `user_id` - Authenticated user, used to scope request coalescing
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: String, token: String, user_id: String, timeout_sec: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .user_agent(concat!(
                "hms-notify/",
                env!("CARGO_PKG_VERSION"),
                "-",
                env!("GIT_HASH")
            ))
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            client,
            base_url,
            token,
            user_id,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn notification_url(&self, id: &str) -> String {
        format!(
            "{}/notifications/{}",
            self.base_url,
            urlencoding::encode(id)
        )
    }

    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_ack(response: Response) -> Result<(), ApiError> {
        let response = Self::ensure_success(response).await?;
        let ack: Ack = response.json().await?;
        if ack.status {
            Ok(())
        } else {
            Err(ApiError::Rejected(
                ack.message
                    .unwrap_or_else(|| "backend reported failure".to_string()),
            ))
        }
    }
}

#[async_trait]
impl NotificationsApi for HttpNotificationsApi {
    fn scope(&self) -> String {
        format!("{}#{}", self.base_url, self.user_id)
    }

    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<NotificationPage, ApiError> {
        let url = format!(
            "{}/notifications?page={}&perPage={}",
            self.base_url, page, per_page
        );
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let page: NotificationPage = Self::ensure_success(response).await?.json().await?;
        if !page.status {
            return Err(ApiError::Rejected(
                "backend reported failure listing notifications".to_string(),
            ));
        }
        Ok(page)
    }

    async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        let url = format!("{}/read", self.notification_url(id));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::read_ack(response).await
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        let url = format!("{}/notifications/read-all", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::read_ack(response).await
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.notification_url(id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::read_ack(response).await
    }

    async fn clear_all(&self) -> Result<(), ApiError> {
        let url = format!("{}/notifications/clear-all", self.base_url);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::read_ack(response).await
    }
}

//! Cadence collaborator clients
//!
//! Narrow interfaces to the services the pipeline stages call out to:
//! - `ObjectStore`: line-oriented reads and writes of stage artifacts
//! - `Embedder`: turns text lines into vectors
//! - `TrainingBackend`: long-running training tasks
//!
//! Each interface has a reqwest-backed HTTP implementation sharing `ApiClient`.
//! The scheduler only depends on the traits, so tests swap in mocks.

pub mod embedding;
pub mod error;
pub mod object_store;
pub mod training;

pub use embedding::{Embedder, HttpEmbedder};
pub use error::{ClientError, Result};
pub use object_store::{HttpObjectStore, ObjectStore};
pub use training::{HttpTrainingClient, TaskStatus, TrainingBackend};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Base HTTP client shared by the collaborator implementations
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Base URL of the service (e.g., "http://localhost:9000")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl ApiClient {
    /// Create a new client for the service at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn http(&self) -> &Client {
        &self.client
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle a response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle a response that returns no content
    pub(crate) async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await?;
        Ok(())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(response.url().path().to_string()));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }
}

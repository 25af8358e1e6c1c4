//! Embedding model client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ApiClient;
use crate::error::{ClientError, Result};

/// Turns text into fixed-size vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds every line, returning one vector per input line in order
    async fn embed(&self, model: &str, lines: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding service reached over HTTP: `POST {base}/embeddings`
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    api: ApiClient,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiClient::new(base_url),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, model: &str, lines: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .api
            .http()
            .post(self.api.url("embeddings"))
            .json(&EmbedRequest { model, input: lines })
            .send()
            .await?;

        let body: EmbedResponse = self.api.handle_response(response).await?;

        if body.embeddings.len() != lines.len() {
            return Err(ClientError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                lines.len(),
                body.embeddings.len()
            )));
        }

        Ok(body.embeddings)
    }
}

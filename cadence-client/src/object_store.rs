//! Object store client
//!
//! Stage artifacts are stored as newline-separated text objects.

use async_trait::async_trait;
use tracing::debug;

use crate::ApiClient;
use crate::error::Result;

/// Line-oriented object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads the object at `path` as lines
    async fn read(&self, path: &str) -> Result<Vec<String>>;

    /// Replaces the object at `path` with `lines`
    async fn write(&self, path: &str, lines: &[String]) -> Result<()>;
}

/// Object store reached over HTTP: `GET`/`PUT {base}/objects/{path}`
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    api: ApiClient,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiClient::new(base_url),
        }
    }

    fn object_url(&self, path: &str) -> String {
        self.api
            .url(&format!("objects/{}", path.trim_start_matches('/')))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn read(&self, path: &str) -> Result<Vec<String>> {
        let response = self.api.http().get(self.object_url(path)).send().await?;
        let body = ApiClient::check_status(response).await?.text().await?;
        debug!("Read {} bytes from {}", body.len(), path);

        Ok(split_lines(&body))
    }

    async fn write(&self, path: &str, lines: &[String]) -> Result<()> {
        let response = self
            .api
            .http()
            .put(self.object_url(path))
            .body(lines.join("\n"))
            .send()
            .await?;

        debug!("Wrote {} lines to {}", lines.len(), path);

        self.api.handle_empty_response(response).await
    }
}

fn split_lines(body: &str) -> Vec<String> {
    body.lines().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url() {
        let store = HttpObjectStore::new("http://minio:9000/");
        assert_eq!(
            store.object_url("/jobs/1/downloaded.txt"),
            "http://minio:9000/objects/jobs/1/downloaded.txt"
        );
    }

    #[test]
    fn test_split_lines_handles_crlf() {
        assert_eq!(split_lines("a\r\nb\nc"), vec!["a", "b", "c"]);
        assert!(split_lines("").is_empty());
    }
}

//! Training backend client
//!
//! Training runs as a long-lived remote task; the caller creates it once and
//! then polls its status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ApiClient;
use crate::error::Result;

/// Status of a remote training task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "Created",
            TaskStatus::Processing => "Processing",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        }
    }
}

/// Long-running training tasks
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// Starts a task reading `input_path` and writing `output_path`, returns its ID
    async fn create_task(&self, input_path: &str, output_path: &str) -> Result<String>;

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus>;
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest<'a> {
    input_path: &'a str,
    output_path: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    status: TaskStatus,
}

/// Training backend reached over HTTP: `POST {base}/tasks`, `GET {base}/tasks/{id}`
#[derive(Debug, Clone)]
pub struct HttpTrainingClient {
    api: ApiClient,
}

impl HttpTrainingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            api: ApiClient::new(base_url),
        }
    }
}

#[async_trait]
impl TrainingBackend for HttpTrainingClient {
    async fn create_task(&self, input_path: &str, output_path: &str) -> Result<String> {
        let response = self
            .api
            .http()
            .post(self.api.url("tasks"))
            .json(&CreateTaskRequest {
                input_path,
                output_path,
            })
            .send()
            .await?;

        let body: CreateTaskResponse = self.api.handle_response(response).await?;
        tracing::info!("Training task {} created for {}", body.task_id, input_path);

        Ok(body.task_id)
    }

    async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let response = self
            .api
            .http()
            .get(self.api.url(&format!("tasks/{}", task_id)))
            .send()
            .await?;

        let body: TaskStatusResponse = self.api.handle_response(response).await?;
        Ok(body.status)
    }
}

//! Pipeline stages
//!
//! Each stage is bound to the state it produces and records its output in
//! the job results plus a `True` condition named after that state. With
//! `idempotent_execution`, a stage whose condition is already `True` is
//! skipped without touching any collaborator.

use cadence_client::TaskStatus;
use cadence_core::domain::{
    ConditionStatus, DownloadResult, EmbeddingResult, Job, JobStatus, PipelineParams,
    TrainingResult,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::StageError;
use crate::watch::SharedConfig;

pub const DOWNLOAD_FILE: &str = "downloaded.txt";
pub const EMBEDDINGS_FILE: &str = "embeddings.jsonl";
pub const MODEL_DIR: &str = "model";

const DEFAULT_EMBEDDING_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Work is done, the job moves on
    Advance,
    /// Work is still in progress, the job stays where it was
    Stay,
}

/// Runs the stage producing `destination`, if any
pub async fn run_stage(
    destination: JobStatus,
    job: &mut Job,
    config: &SharedConfig,
    now: DateTime<Utc>,
) -> Result<StageOutcome, StageError> {
    if !matches!(
        destination,
        JobStatus::Downloaded | JobStatus::Embedded | JobStatus::Trained
    ) {
        return Ok(StageOutcome::Advance);
    }

    let params = job
        .params
        .pipeline()
        .cloned()
        .ok_or(StageError::MissingParams)?;

    if params.idempotent_execution && job.conditions.is_true(destination.as_str()) {
        debug!("Job {} already reached {}, skipping stage", job.id, destination);
        return Ok(StageOutcome::Advance);
    }

    match destination {
        JobStatus::Downloaded => download(job, &params, config, now).await,
        JobStatus::Embedded => embed(job, &params, config, now).await,
        JobStatus::Trained => train(job, &params, config, now).await,
        _ => Ok(StageOutcome::Advance),
    }
}

fn artifact_path(work_dir: &str, name: &str) -> String {
    format!("{}/{}", work_dir.trim_end_matches('/'), name)
}

async fn download(
    job: &mut Job,
    params: &PipelineParams,
    config: &SharedConfig,
    now: DateTime<Utc>,
) -> Result<StageOutcome, StageError> {
    let lines: Vec<String> = config
        .object_store
        .read(&params.source_path)
        .await?
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    let path = artifact_path(&params.work_dir, DOWNLOAD_FILE);
    config.object_store.write(&path, &lines).await?;

    info!("Job {} downloaded {} lines to {}", job.id, lines.len(), path);
    job.results.pipeline_mut().download = Some(DownloadResult {
        path,
        line_count: lines.len(),
    });
    job.conditions.set(
        JobStatus::Downloaded.as_str(),
        ConditionStatus::True,
        format!("{} lines", lines.len()),
        now,
    );

    Ok(StageOutcome::Advance)
}

async fn embed(
    job: &mut Job,
    params: &PipelineParams,
    config: &SharedConfig,
    now: DateTime<Utc>,
) -> Result<StageOutcome, StageError> {
    let input = job
        .results
        .pipeline()
        .and_then(|r| r.download.as_ref())
        .map(|d| d.path.clone())
        .ok_or(StageError::MissingOutput("download"))?;

    let lines = config.object_store.read(&input).await?;
    let batch_size = params
        .embedding_batch_size
        .unwrap_or(DEFAULT_EMBEDDING_BATCH)
        .max(1);

    let mut encoded = Vec::with_capacity(lines.len());
    let mut dimensions = 0;
    for batch in lines.chunks(batch_size) {
        let vectors = config.embedder.embed(&config.embedding_model, batch).await?;
        for vector in vectors {
            dimensions = vector.len();
            encoded.push(serde_json::to_string(&vector)?);
        }
    }

    let path = artifact_path(&params.work_dir, EMBEDDINGS_FILE);
    config.object_store.write(&path, &encoded).await?;

    info!("Job {} embedded {} lines to {}", job.id, encoded.len(), path);
    job.results.pipeline_mut().embedding = Some(EmbeddingResult {
        path,
        count: encoded.len(),
        dimensions,
    });
    job.conditions.set(
        JobStatus::Embedded.as_str(),
        ConditionStatus::True,
        format!("{} vectors", encoded.len()),
        now,
    );

    Ok(StageOutcome::Advance)
}

async fn train(
    job: &mut Job,
    params: &PipelineParams,
    config: &SharedConfig,
    now: DateTime<Utc>,
) -> Result<StageOutcome, StageError> {
    let input = job
        .results
        .pipeline()
        .and_then(|r| r.embedding.as_ref())
        .map(|e| e.path.clone())
        .ok_or(StageError::MissingOutput("embedding"))?;

    let existing = job
        .results
        .pipeline()
        .and_then(|r| r.training.as_ref())
        .map(|t| t.task_id.clone());

    let task_id = match existing {
        Some(task_id) => task_id,
        None => {
            config.train_limiter.wait().await;
            let output_path = artifact_path(&params.work_dir, MODEL_DIR);
            let task_id = config.trainer.create_task(&input, &output_path).await?;

            info!("Job {} started training task {}", job.id, task_id);
            job.results.pipeline_mut().training = Some(TrainingResult {
                task_id: task_id.clone(),
                output_path,
                status: TaskStatus::Created.as_str().to_string(),
            });
            task_id
        }
    };

    let status = config.trainer.get_task_status(&task_id).await?;
    if let Some(training) = job.results.pipeline_mut().training.as_mut() {
        training.status = status.as_str().to_string();
    }

    match status {
        TaskStatus::Completed => {
            job.conditions.set(
                JobStatus::Trained.as_str(),
                ConditionStatus::True,
                format!("task {} completed", task_id),
                now,
            );
            Ok(StageOutcome::Advance)
        }
        TaskStatus::Failed => Err(StageError::TrainingFailed(task_id)),
        TaskStatus::Created | TaskStatus::Processing => {
            debug!("Job {} waiting on training task {}", job.id, task_id);
            Ok(StageOutcome::Stay)
        }
    }
}

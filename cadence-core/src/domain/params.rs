//! Stage-specific job input and output
//!
//! Both are tagged by job kind. A job that has not produced anything yet, or
//! whose kind is unknown to this build, carries `None`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobParams {
    Pipeline(PipelineParams),
    #[default]
    #[serde(other)]
    None,
}

impl JobParams {
    pub fn pipeline(&self) -> Option<&PipelineParams> {
        match self {
            JobParams::Pipeline(params) => Some(params),
            JobParams::None => None,
        }
    }
}

/// Input of the download → embed → train pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    /// Object store path of the raw input lines
    pub source_path: String,
    /// Object store prefix the stages write their output under
    pub work_dir: String,
    /// Model the training backend fine-tunes
    #[serde(default)]
    pub base_model: String,
    /// Skip stages that already carry a `True` condition
    #[serde(default)]
    pub idempotent_execution: bool,
    /// Overrides the scheduler-wide job timeout
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub embedding_batch_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobResults {
    Pipeline(PipelineResults),
    #[default]
    #[serde(other)]
    None,
}

impl JobResults {
    pub fn pipeline(&self) -> Option<&PipelineResults> {
        match self {
            JobResults::Pipeline(results) => Some(results),
            JobResults::None => None,
        }
    }

    /// Pipeline results, switching an empty value over to the pipeline kind
    pub fn pipeline_mut(&mut self) -> &mut PipelineResults {
        if let JobResults::None = self {
            *self = JobResults::Pipeline(PipelineResults::default());
        }
        match self {
            JobResults::Pipeline(results) => results,
            JobResults::None => unreachable!("results were just initialized"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResults {
    #[serde(default)]
    pub download: Option<DownloadResult>,
    #[serde(default)]
    pub embedding: Option<EmbeddingResult>,
    #[serde(default)]
    pub training: Option<TrainingResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub path: String,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub path: String,
    pub count: usize,
    pub dimensions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub task_id: String,
    pub output_path: String,
    /// Last status reported by the training backend
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_kind_reads_as_none() {
        let params: JobParams = serde_json::from_value(json!({ "kind": "export" })).unwrap();
        assert_eq!(params, JobParams::None);

        let results: JobResults = serde_json::from_value(json!({ "kind": "export" })).unwrap();
        assert_eq!(results, JobResults::None);

        // The empty value is written with its own tag and reads back the same
        let value = serde_json::to_value(JobResults::None).unwrap();
        assert_eq!(value, json!({ "kind": "none" }));
        assert_eq!(serde_json::from_value::<JobResults>(value).unwrap(), JobResults::None);
    }

    #[test]
    fn test_pipeline_params_defaults() {
        let params: JobParams = serde_json::from_value(json!({
            "kind": "pipeline",
            "source_path": "raw/docs.txt",
            "work_dir": "jobs/7",
        }))
        .unwrap();

        let pipeline = params.pipeline().unwrap();
        assert!(!pipeline.idempotent_execution);
        assert_eq!(pipeline.timeout_seconds, None);
        assert_eq!(pipeline.work_dir, "jobs/7");
    }

    #[test]
    fn test_partial_results_are_valid() {
        let results: JobResults = serde_json::from_value(json!({
            "kind": "pipeline",
            "download": { "path": "jobs/7/downloaded.txt", "line_count": 3 },
        }))
        .unwrap();

        let pipeline = results.pipeline().unwrap();
        assert_eq!(pipeline.download.as_ref().unwrap().line_count, 3);
        assert!(pipeline.embedding.is_none());
        assert!(pipeline.training.is_none());
    }

    #[test]
    fn test_pipeline_mut_initializes_empty_results() {
        let mut results = JobResults::None;
        results.pipeline_mut().download = Some(DownloadResult {
            path: "p".to_string(),
            line_count: 1,
        });
        assert!(results.pipeline().unwrap().download.is_some());
    }
}

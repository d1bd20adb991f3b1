use crate::model::{ProcessResult, ResultStatus};
use serde::Serialize;

/// Aggregate of one sync run.
///
/// `success` is true only when the run proceeded past validation and no
/// repository failed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncSummary {
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub duration_seconds: f64,
    pub results: Vec<ProcessResult>,
    pub errors: Vec<String>,
    pub success: bool,
}

impl SyncSummary {
    pub fn from_results(results: Vec<ProcessResult>, duration_seconds: f64) -> Self {
        let mut success_count = 0;
        let mut failed_count = 0;
        let mut skipped_count = 0;
        let mut errors = Vec::new();
        for result in &results {
            match result.status {
                ResultStatus::Success => success_count += 1,
                ResultStatus::Skipped => skipped_count += 1,
                ResultStatus::Failed => {
                    failed_count += 1;
                    let detail = result.error.as_deref().unwrap_or(result.message.as_str());
                    errors.push(format!("{}: {detail}", result.repo_name));
                }
            }
        }
        Self {
            total: results.len(),
            success_count,
            failed_count,
            skipped_count,
            duration_seconds: duration_seconds.max(0.0),
            results,
            errors,
            success: failed_count == 0,
        }
    }

    /// A run that could not proceed at all.
    pub fn fatal(error: impl Into<String>, duration_seconds: f64) -> Self {
        Self {
            total: 0,
            success_count: 0,
            failed_count: 0,
            skipped_count: 0,
            duration_seconds: duration_seconds.max(0.0),
            results: Vec::new(),
            errors: vec![error.into()],
            success: false,
        }
    }
}

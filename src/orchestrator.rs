//! Workflow Orchestrator (C10).
//!
//! Stitches the matrix loader, config validator, planner, batch executor, and manifest
//! persistence into a single run: `validate -> load matrix -> plan -> execute -> persist`.
//! A run succeeds once the manifest is persisted, regardless of per-task success rates; it
//! fails only if a stage before dispatch failed (including `execute` itself rejecting an
//! incompatible mode/destination pairing before any transfer starts), or manifest
//! persistence exhausted its retries.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, Instrument};

use crate::cancellation::CancellationSignal;
use crate::config::{self, CollectionRequest};
use crate::error::CoreError;
use crate::executor::{BatchExecutor, ExecutorOptions};
use crate::matrix::AvailabilityMatrix;
use crate::planner::{self, TaskOutcome};
use crate::storage::Storage;
use crate::transfer::TaskResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub tasks_total: usize,
    pub tasks_succeeded: usize,
    pub tasks_skipped: usize,
    pub tasks_failed: usize,
    pub bytes_transferred: u64,
    pub results: Vec<TaskResult>,
}

impl RunManifest {
    fn from_results(
        run_id: String,
        started_at: DateTime<Utc>,
        status: RunStatus,
        results: Vec<TaskResult>,
    ) -> Self {
        let tasks_total = results.len();
        let tasks_succeeded = results
            .iter()
            .filter(|r| r.outcome == TaskOutcome::Copied)
            .count();
        let tasks_skipped = results
            .iter()
            .filter(|r| r.outcome == TaskOutcome::SkippedExisting)
            .count();
        let tasks_failed = tasks_total - tasks_succeeded - tasks_skipped;
        let bytes_transferred = results.iter().map(|r| r.bytes_transferred).sum();

        Self {
            run_id,
            status,
            started_at,
            ended_at: Utc::now(),
            tasks_total,
            tasks_succeeded,
            tasks_skipped,
            tasks_failed,
            bytes_transferred,
            results,
        }
    }
}

const MATRIX_LOAD_RETRY_ATTEMPTS: u32 = 2;
const MANIFEST_PERSIST_ATTEMPTS: u32 = 3;
const MANIFEST_PERSIST_BACKOFF: Duration = Duration::from_secs(2);

/// Runs the full collection workflow for `request` against the matrix at `matrix_path`.
pub async fn run(
    request: CollectionRequest,
    matrix_path: &Path,
    tool_binary: &str,
    cancel: CancellationSignal,
) -> Result<RunManifest, CoreError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let span = info_span!("run", run_id = %run_id);

    async move {
        info!("workflow started");

        // Stage: load_matrix — retries once on I/O error, per §4.9.
        let mut matrix_result = AvailabilityMatrix::load(matrix_path);
        for attempt in 0..MATRIX_LOAD_RETRY_ATTEMPTS {
            match &matrix_result {
                Ok(_) => break,
                Err(_) if attempt + 1 < MATRIX_LOAD_RETRY_ATTEMPTS => {
                    error!(attempt, "load_matrix failed, retrying");
                    matrix_result = AvailabilityMatrix::load(matrix_path);
                }
                Err(_) => break,
            }
        }
        let matrix = matrix_result?;

        // Stage: validate_config — deterministic, no retry.
        let normalized = config::validate(&request, &matrix)?;

        // Stage: plan — deterministic, no retry.
        let tasks = planner::plan(&normalized, &matrix);
        info!(task_count = tasks.len(), "planning complete");

        // Stage: execute — delegates per-task retries to the batch executor.
        let storage = Storage::for_destination(&normalized.destination).await?;
        let executor = BatchExecutor::new(tool_binary);
        let opts = ExecutorOptions {
            batch_size: normalized.batch_size,
            max_concurrency: normalized.max_concurrency,
            mode: normalized.mode,
            incremental: normalized.incremental,
            force: normalized.force,
            verify_checksum: normalized.verify_checksum,
            timeout: Duration::from_secs(normalized.timeout_secs),
            tool_binary: tool_binary.to_string(),
        };

        let results = executor
            .execute(tasks, &storage, &normalized.destination, &opts, &cancel)
            .await?;

        let status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        };
        let manifest = RunManifest::from_results(run_id.clone(), started_at, status, results);

        // Stage: persist_manifest — retries up to 3 times with 2s back-off.
        persist_with_retries(&storage, &normalized.destination, &manifest).await?;

        info!(
            status = ?manifest.status,
            tasks_total = manifest.tasks_total,
            tasks_failed = manifest.tasks_failed,
            "workflow finished"
        );
        Ok(manifest)
    }
    .instrument(span)
    .await
}

async fn persist_with_retries(
    storage: &Storage,
    destination: &config::Destination,
    manifest: &RunManifest,
) -> Result<(), CoreError> {
    let body = serde_json::to_vec_pretty(manifest)
        .map_err(|e| CoreError::StorageError(format!("serializing manifest: {e}")))?;

    let mut last_err = None;
    for attempt in 0..MANIFEST_PERSIST_ATTEMPTS {
        match storage.put_manifest(destination, &manifest.run_id, &body).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                error!(attempt, error = %e, "persist_manifest failed");
                last_err = Some(e);
                if attempt + 1 < MANIFEST_PERSIST_ATTEMPTS {
                    tokio::time::sleep(MANIFEST_PERSIST_BACKOFF).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or(CoreError::StorageError("persist_manifest exhausted retries".into())))
}

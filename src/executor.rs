//! Batch Executor (C8).
//!
//! Chunks tasks into batches, probes for incremental skip, dispatches each batch to the
//! strategy chosen by the mode selector, and retries transient per-task failures with
//! jittered back-off. Never fails the run because a task failed — it returns a result
//! vector and lets the orchestrator decide. The only way this stage itself fails the run is
//! a mode/destination mismatch caught before any dispatch happens.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cancellation::CancellationSignal;
use crate::config::{Destination, Mode};
use crate::error::CoreError;
use crate::planner::{TaskOutcome, TransferTask};
use crate::retry::RetryPolicy;
use crate::storage::Storage;
use crate::transfer::tool::{ToolAdapter, ToolOptions};
use crate::transfer::{direct, selector, traditional, Strategy, TaskResult};

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub mode: Mode,
    pub incremental: bool,
    pub force: bool,
    pub verify_checksum: bool,
    pub timeout: Duration,
    pub tool_binary: String,
}

/// The bulk transfer tool's worker count is capped by both the batch size (no point
/// spinning up more workers than there are lines in this batch's file) and the run's
/// overall concurrency budget. The source archive bucket is public, so every direct-sync
/// copy is issued unsigned, per §4.5.
fn tool_options(opts: &ExecutorOptions) -> ToolOptions {
    ToolOptions {
        worker_count: opts.batch_size.min(opts.max_concurrency).max(1),
        unsigned_request: true,
        ..ToolOptions::default()
    }
}

pub struct BatchExecutor {
    http_client: reqwest::Client,
    tool: ToolAdapter,
    retry_policy: RetryPolicy,
}

impl BatchExecutor {
    pub fn new(tool_binary: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            tool: ToolAdapter::new(tool_binary),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Runs `tasks` to completion (or until cancelled). Empty input returns an empty result
    /// vector, never an error. Fails fast with [`CoreError::IncompatibleMode`] if `opts.mode`
    /// is `Direct` and `destination` is not an object store, before anything is dispatched.
    pub async fn execute(
        &self,
        tasks: Vec<TransferTask>,
        storage: &Storage,
        destination: &Destination,
        opts: &ExecutorOptions,
        cancel: &CancellationSignal,
    ) -> Result<Vec<TaskResult>, CoreError> {
        if opts.mode == Mode::Direct && !destination.is_object_store() {
            return Err(CoreError::IncompatibleMode(
                "direct mode requires an S3-compatible destination".into(),
            ));
        }

        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let (skipped, remaining) = if opts.incremental && !opts.force {
            self.partition_existing(tasks, storage, opts.max_concurrency)
                .await
        } else {
            (Vec::new(), tasks)
        };

        let mut results = skipped;
        if remaining.is_empty() || cancel.is_cancelled() {
            results.extend(remaining.into_iter().map(|task| TaskResult {
                task,
                outcome: TaskOutcome::TransientError,
                bytes_transferred: 0,
                duration: Duration::ZERO,
                attempts: 0,
                strategy_used: Strategy::Traditional,
            }));
            return Ok(results);
        }

        let batches: Vec<Vec<TransferTask>> = remaining
            .chunks(opts.batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();

        // One semaphore, sized to the run's `max_concurrency`, shared by every batch's
        // transfer phase below — this is the only concurrency cap that matters. Batch
        // dispatch itself fans out freely; it's the permits acquired inside
        // `traditional::execute`/`direct::execute` that bound how many operations are
        // actually in flight at once across the whole run.
        let semaphore = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
        let batch_count = batches.len().max(1);

        let batch_results: Vec<Vec<TaskResult>> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| {
                let semaphore = semaphore.clone();
                async move {
                    if cancel.is_cancelled() {
                        return batch
                            .into_iter()
                            .map(|task| TaskResult {
                                task,
                                outcome: TaskOutcome::TransientError,
                                bytes_transferred: 0,
                                duration: Duration::ZERO,
                                attempts: 0,
                                strategy_used: Strategy::Traditional,
                            })
                            .collect();
                    }
                    debug!(batch_index = index, size = batch.len(), "dispatching batch");
                    self.run_batch_with_retries(batch, storage, destination, opts, cancel, &semaphore)
                        .await
                }
            })
            .buffer_unordered(batch_count)
            .collect()
            .await;

        results.extend(batch_results.into_iter().flatten());
        info!(total = results.len(), "batch executor finished");
        Ok(results)
    }

    async fn partition_existing(
        &self,
        tasks: Vec<TransferTask>,
        storage: &Storage,
        max_concurrency: usize,
    ) -> (Vec<TaskResult>, Vec<TransferTask>) {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let checked: Vec<(TransferTask, bool)> = stream::iter(tasks)
            .map(|task| {
                let semaphore = semaphore.clone();
                let uri = storage.destination_uri(&task);
                async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    let exists = storage.exists(&uri).await.unwrap_or(false);
                    (task, exists)
                }
            })
            .buffer_unordered(max_concurrency.max(1))
            .collect()
            .await;

        let mut skipped = Vec::new();
        let mut remaining = Vec::new();
        for (task, exists) in checked {
            if exists {
                skipped.push(TaskResult {
                    task,
                    outcome: TaskOutcome::SkippedExisting,
                    bytes_transferred: 0,
                    duration: Duration::ZERO,
                    attempts: 0,
                    strategy_used: Strategy::Traditional,
                });
            } else {
                remaining.push(task);
            }
        }
        (skipped, remaining)
    }

    async fn run_batch_with_retries(
        &self,
        mut pending: Vec<TransferTask>,
        storage: &Storage,
        destination: &Destination,
        opts: &ExecutorOptions,
        cancel: &CancellationSignal,
        semaphore: &Arc<Semaphore>,
    ) -> Vec<TaskResult> {
        let mut finished = Vec::new();
        let mut attempt: u32 = 0;
        let mut downgraded_to_traditional = false;

        loop {
            if pending.is_empty() || cancel.is_cancelled() {
                break;
            }

            let tool_available = self.tool.is_available().await;
            let batch_result = self
                .run_batch_once(
                    &pending,
                    storage,
                    destination,
                    opts,
                    tool_available,
                    downgraded_to_traditional,
                    semaphore,
                )
                .await;

            let batch_result = match batch_result {
                Ok(results) => results,
                Err(CoreError::ToolUnavailable(reason)) if !downgraded_to_traditional => {
                    warn!(%reason, "bulk transfer tool unavailable, downgrading batch to traditional strategy");
                    downgraded_to_traditional = true;
                    continue;
                }
                Err(CoreError::ToolUnavailable(_)) => pending
                    .iter()
                    .cloned()
                    .map(|task| TaskResult {
                        task,
                        outcome: TaskOutcome::TransientError,
                        bytes_transferred: 0,
                        duration: Duration::ZERO,
                        attempts: attempt + 1,
                        strategy_used: Strategy::Traditional,
                    })
                    .collect(),
                Err(other) => {
                    warn!(error = %other, "batch execution failed outright");
                    pending
                        .iter()
                        .cloned()
                        .map(|task| TaskResult {
                            task,
                            outcome: TaskOutcome::TransientError,
                            bytes_transferred: 0,
                            duration: Duration::ZERO,
                            attempts: attempt + 1,
                            strategy_used: Strategy::Traditional,
                        })
                        .collect()
                }
            };

            let mut retryable = Vec::new();
            for result in batch_result {
                if result.outcome == TaskOutcome::TransientError
                    && attempt + 1 < self.retry_policy.max_attempts()
                {
                    retryable.push(result.task);
                } else {
                    finished.push(result);
                }
            }

            pending = retryable;
            if pending.is_empty() {
                break;
            }

            attempt += 1;
            let backoff = self.retry_policy.backoff_for(attempt - 1);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => break,
            }
        }

        finished.extend(pending.into_iter().map(|task| TaskResult {
            task,
            outcome: TaskOutcome::TransientError,
            bytes_transferred: 0,
            duration: Duration::ZERO,
            attempts: attempt + 1,
            strategy_used: Strategy::Traditional,
        }));

        finished
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_batch_once(
        &self,
        tasks: &[TransferTask],
        storage: &Storage,
        destination: &Destination,
        opts: &ExecutorOptions,
        tool_available: bool,
        force_traditional: bool,
        semaphore: &Arc<Semaphore>,
    ) -> Result<Vec<TaskResult>, CoreError> {
        if force_traditional || opts.mode == Mode::Traditional {
            return Ok(traditional::execute(
                &self.http_client,
                tasks,
                storage,
                destination,
                semaphore.clone(),
                opts.verify_checksum,
                opts.timeout,
            )
            .await);
        }

        if opts.mode == Mode::Hybrid {
            let (direct_tasks, traditional_tasks): (Vec<_>, Vec<_>) = tasks
                .iter()
                .cloned()
                .partition(|t| selector::select_for_task(&t.source_uri, destination) == Strategy::DirectSync);

            let mut results = Vec::new();
            if !direct_tasks.is_empty() {
                results.extend(
                    direct::execute(
                        &self.tool,
                        &direct_tasks,
                        storage,
                        &tool_options(opts),
                        opts.timeout,
                        semaphore.clone(),
                    )
                    .await?,
                );
            }
            if !traditional_tasks.is_empty() {
                results.extend(
                    traditional::execute(
                        &self.http_client,
                        &traditional_tasks,
                        storage,
                        destination,
                        semaphore.clone(),
                        opts.verify_checksum,
                        opts.timeout,
                    )
                    .await,
                );
            }
            return Ok(results);
        }

        let strategy = selector::select(opts.mode, destination, tool_available)?;
        match strategy {
            Strategy::DirectSync => {
                direct::execute(
                    &self.tool,
                    tasks,
                    storage,
                    &tool_options(opts),
                    opts.timeout,
                    semaphore.clone(),
                )
                .await
            }
            Strategy::Traditional => Ok(traditional::execute(
                &self.http_client,
                tasks,
                storage,
                destination,
                semaphore.clone(),
                opts.verify_checksum,
                opts.timeout,
            )
            .await),
        }
    }
}

//! Direct-Sync Strategy (C5).
//!
//! Selected only when the destination is an S3-compatible bucket: each task becomes a
//! single `source_s3 -> destination_s3` copy line in the bulk tool's batch file. No bytes
//! traverse the client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::error::CoreError;
use crate::planner::{TaskOutcome, TransferTask};
use crate::storage::Storage;
use crate::transfer::tool::{CopyLine, ToolAdapter, ToolOptions};
use crate::transfer::{Strategy, TaskResult};

/// Reserves `opts.worker_count` permits from the run-wide `semaphore` before invoking the
/// tool, so a concurrently dispatched direct-sync batch counts against the same
/// `max_concurrency` budget as every traditional-strategy fetch in flight elsewhere.
pub async fn execute(
    tool: &ToolAdapter,
    tasks: &[TransferTask],
    storage: &Storage,
    opts: &ToolOptions,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
) -> Result<Vec<TaskResult>, CoreError> {
    let lines: Vec<CopyLine> = tasks
        .iter()
        .map(|t| CopyLine {
            source: t.source_uri.clone(),
            destination: storage.destination_uri(t),
        })
        .collect();

    let worker_permits = (opts.worker_count as u32).max(1);
    let _permits = semaphore
        .acquire_many_owned(worker_permits)
        .await
        .expect("semaphore closed");

    let started = Instant::now();
    let outcomes = tool.run_batch(&lines, opts, timeout).await?;
    let elapsed = started.elapsed();
    let per_task_duration = if tasks.is_empty() {
        Duration::ZERO
    } else {
        elapsed / tasks.len() as u32
    };

    Ok(tasks
        .iter()
        .map(|task| {
            let destination = storage.destination_uri(task);
            let outcome = outcomes
                .iter()
                .find(|o| o.destination == destination)
                .map(|o| o.outcome)
                .unwrap_or(TaskOutcome::TransientError);
            TaskResult {
                task: task.clone(),
                outcome,
                bytes_transferred: 0,
                duration: per_task_duration,
                attempts: 1,
                strategy_used: Strategy::DirectSync,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Market, Partition};
    use crate::planner::TaskContext;

    fn task() -> TransferTask {
        TransferTask {
            source_uri: "s3://archive/spot/klines/BTCUSDT/1h/x.zip".into(),
            target_key: "/prefix/bronze/binance/spot/klines/BTCUSDT/1h/2025/07/15/x.zip".into(),
            checksum_source_uri: None,
            expected_size_hint: None,
            context: TaskContext {
                market: Market::Spot,
                data_type: "klines".into(),
                symbol: "BTCUSDT".into(),
                interval: Some("1h".into()),
                date: "2025-07-15".into(),
                partition: Partition::Daily,
            },
        }
    }

    #[tokio::test]
    async fn successful_tool_run_marks_tasks_copied() {
        let tool = ToolAdapter::new("/bin/true");
        let storage = Storage::ObjectStore {
            client: aws_sdk_s3::Client::new(
                &aws_config::SdkConfig::builder()
                    .behavior_version(aws_config::BehaviorVersion::latest())
                    .build(),
            ),
            bucket: "dst-bucket".into(),
        };
        let results = execute(
            &tool,
            &[task()],
            &storage,
            &ToolOptions::default(),
            Duration::from_secs(5),
            Arc::new(Semaphore::new(8)),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, TaskOutcome::Copied);
        assert_eq!(results[0].strategy_used, Strategy::DirectSync);
    }
}

//! Traditional Strategy (C6).
//!
//! Per-file HTTPS GET to local or staged storage, with a bounded-concurrency worker pool and
//! optional verification against the `.CHECKSUM` sibling object.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

use crate::planner::{TaskOutcome, TransferTask};
use crate::storage::Storage;
use crate::transfer::{Strategy, TaskResult};

/// Fetches every task, bounded by permits drawn from `semaphore` rather than a pool sized
/// for this call alone — `semaphore` is shared with every other batch and strategy in the
/// run, so the HTTP fetch itself is where the run's overall `max_concurrency` is enforced.
pub async fn execute(
    client: &reqwest::Client,
    tasks: &[TransferTask],
    storage: &Storage,
    destination: &crate::config::Destination,
    semaphore: Arc<Semaphore>,
    verify_checksum: bool,
    timeout: Duration,
) -> Vec<TaskResult> {
    let storage = Arc::new(storage.clone());
    let destination = Arc::new(destination.clone());
    let client = client.clone();

    stream::iter(tasks.iter().cloned())
        .map(|task| {
            let client = client.clone();
            let storage = storage.clone();
            let destination = destination.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                fetch_one(&client, &task, &storage, &destination, verify_checksum, timeout).await
            }
        })
        .buffer_unordered(tasks.len().max(1))
        .collect()
        .await
}

async fn fetch_one(
    client: &reqwest::Client,
    task: &TransferTask,
    storage: &Storage,
    destination: &crate::config::Destination,
    verify_checksum: bool,
    timeout: Duration,
) -> TaskResult {
    let started = Instant::now();
    let (outcome, bytes_transferred) =
        match fetch_and_write(client, task, storage, destination, verify_checksum, timeout).await {
            Ok(bytes) => (TaskOutcome::Copied, bytes),
            Err(outcome) => (outcome, 0),
        };

    TaskResult {
        task: task.clone(),
        outcome,
        bytes_transferred,
        duration: started.elapsed(),
        attempts: 1,
        strategy_used: Strategy::Traditional,
    }
}

async fn fetch_and_write(
    client: &reqwest::Client,
    task: &TransferTask,
    storage: &Storage,
    destination: &crate::config::Destination,
    verify_checksum: bool,
    timeout: Duration,
) -> Result<u64, TaskOutcome> {
    let response = tokio::time::timeout(timeout, client.get(&task.source_uri).send())
        .await
        .map_err(|_| TaskOutcome::TransientError)?
        .map_err(classify_reqwest_error)?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(TaskOutcome::SourceMissing);
    }
    if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(TaskOutcome::PermanentError);
    }
    if status.is_server_error() {
        return Err(TaskOutcome::TransientError);
    }
    if !status.is_success() {
        return Err(TaskOutcome::PermanentError);
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|_| TaskOutcome::TransientError)?;

    if verify_checksum {
        if let Some(checksum_uri) = &task.checksum_source_uri {
            match client.get(checksum_uri).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let expected = resp.text().await.unwrap_or_default();
                    let expected = expected.split_whitespace().next().unwrap_or("");
                    let actual = hex::encode(Sha256::digest(&bytes));
                    if !expected.is_empty() && expected != actual {
                        return Err(TaskOutcome::ChecksumMismatch);
                    }
                }
                _ => {
                    // Checksum sibling missing is not itself a transfer failure; the
                    // vendor does not always publish one even when `checksum_files` is set.
                }
            }
        }
    }

    write_destination(storage, destination, task, &bytes).await?;
    Ok(bytes.len() as u64)
}

async fn write_destination(
    storage: &Storage,
    destination: &crate::config::Destination,
    task: &TransferTask,
    bytes: &[u8],
) -> Result<(), TaskOutcome> {
    match (storage, destination) {
        (Storage::Local, crate::config::Destination::LocalDirectory { .. }) => {
            let path = Path::new(&task.target_key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|_| TaskOutcome::PermanentError)?;
            }
            let mut file = tokio::fs::File::create(path)
                .await
                .map_err(|_| TaskOutcome::PermanentError)?;
            file.write_all(bytes)
                .await
                .map_err(|_| TaskOutcome::TransientError)?;
            Ok(())
        }
        (Storage::ObjectStore { client, bucket }, crate::config::Destination::ObjectStoreBucket { .. }) => {
            client
                .put_object()
                .bucket(bucket)
                .key(task.target_key.trim_start_matches('/'))
                .body(bytes.to_vec().into())
                .send()
                .await
                .map_err(|_| TaskOutcome::TransientError)?;
            Ok(())
        }
        _ => Err(TaskOutcome::PermanentError),
    }
}

fn classify_reqwest_error(_err: reqwest::Error) -> TaskOutcome {
    // DNS failures, connect refusals, and mid-stream resets are all transient from the
    // caller's point of view; the retry policy is what decides whether to give up.
    TaskOutcome::TransientError
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Destination;
    use crate::matrix::{Market, Partition};
    use crate::planner::TaskContext;

    fn task(source_uri: &str, target_key: &str) -> TransferTask {
        TransferTask {
            source_uri: source_uri.into(),
            target_key: target_key.into(),
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
    async fn missing_source_reports_source_missing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("x.zip");
        let t = task(
            "https://example.invalid/does-not-exist-xyz.zip",
            target.to_str().unwrap(),
        );
        let storage = Storage::Local;
        let destination = Destination::LocalDirectory {
            root: dir.path().to_str().unwrap().into(),
        };
        let client = reqwest::Client::new();
        let results = execute(
            &client,
            &[t],
            &storage,
            &destination,
            Arc::new(Semaphore::new(1)),
            false,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(results.len(), 1);
        // Either a DNS/connect failure (transient) or a real 404; both are acceptable
        // without network access in CI, but the call must not panic and must terminate.
        assert!(matches!(
            results[0].outcome,
            TaskOutcome::SourceMissing | TaskOutcome::TransientError
        ));
    }
}

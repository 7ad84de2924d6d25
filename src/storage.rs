//! Storage Abstraction (C9).
//!
//! Computes destination URIs for the lakehouse layout and probes existence for incremental
//! skip. The matrix and planner only ever produce `target_key`s (relative to the
//! destination's prefix/root); this module is the only place that knows how to turn one
//! into a fully qualified `file://` or `s3://` URI.

use std::path::Path;

use aws_sdk_s3::Client as S3Client;

use crate::config::Destination;
use crate::error::CoreError;
use crate::planner::TransferTask;

#[derive(Clone)]
pub enum Storage {
    Local,
    ObjectStore {
        client: S3Client,
        bucket: String,
    },
}

impl Storage {
    pub async fn for_destination(destination: &Destination) -> Result<Self, CoreError> {
        match destination {
            Destination::LocalDirectory { .. } => Ok(Storage::Local),
            Destination::ObjectStoreBucket { bucket, region, .. } => {
                let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
                if let Some(region) = region.clone() {
                    loader = loader.region(aws_sdk_s3::config::Region::new(region));
                }
                let sdk_config = loader.load().await;
                Ok(Storage::ObjectStore {
                    client: S3Client::new(&sdk_config),
                    bucket: bucket.clone(),
                })
            }
        }
    }

    /// Computes the fully qualified destination URI for `task`.
    pub fn destination_uri(&self, task: &TransferTask) -> String {
        match self {
            Storage::Local => format!("file://{}", task.target_key),
            Storage::ObjectStore { bucket, .. } => {
                format!("s3://{}/{}", bucket, task.target_key.trim_start_matches('/'))
            }
        }
    }

    /// Cheap existence probe used for incremental skip. `uri` must be one produced by
    /// [`Storage::destination_uri`].
    pub async fn exists(&self, uri: &str) -> Result<bool, CoreError> {
        match self {
            Storage::Local => {
                let path = uri.strip_prefix("file://").unwrap_or(uri);
                match tokio::fs::metadata(Path::new(path)).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                    Err(e) => Err(CoreError::StorageError(format!("{path}: {e}"))),
                }
            }
            Storage::ObjectStore { client, bucket } => {
                let key = uri
                    .strip_prefix(&format!("s3://{bucket}/"))
                    .unwrap_or(uri);
                match client.head_object().bucket(bucket).key(key).send().await {
                    Ok(_) => Ok(true),
                    Err(err) => {
                        let service_err = err.into_service_error();
                        if service_err.is_not_found() {
                            Ok(false)
                        } else {
                            Err(CoreError::StorageError(format!(
                                "head_object {bucket}/{key}: {service_err}"
                            )))
                        }
                    }
                }
            }
        }
    }

    /// Persists `body` at the manifest key `{prefix}/_manifest/{run_id}.json`.
    pub async fn put_manifest(
        &self,
        destination: &Destination,
        run_id: &str,
        body: &[u8],
    ) -> Result<(), CoreError> {
        match (self, destination) {
            (Storage::Local, Destination::LocalDirectory { root }) => {
                let dir = Path::new(root).join("_manifest");
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| CoreError::StorageError(e.to_string()))?;
                let path = dir.join(format!("{run_id}.json"));
                tokio::fs::write(&path, body)
                    .await
                    .map_err(|e| CoreError::StorageError(e.to_string()))
            }
            (Storage::ObjectStore { client, bucket }, Destination::ObjectStoreBucket { prefix, .. }) => {
                let key = format!("{}/_manifest/{run_id}.json", prefix.trim_end_matches('/'));
                client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(body.to_vec().into())
                    .send()
                    .await
                    .map_err(|e| CoreError::StorageError(e.to_string()))?;
                Ok(())
            }
            _ => Err(CoreError::StorageError(
                "storage backend does not match destination kind".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Market, Partition};
    use crate::planner::{TaskContext, TransferTask};

    fn task(target_key: &str) -> TransferTask {
        TransferTask {
            source_uri: "https://data.binance.vision/x.zip".into(),
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
    async fn local_destination_uri_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("bronze/spot/klines/BTCUSDT/1h/2025/07/15/x.zip");
        let t = task(target.to_str().unwrap());
        let storage = Storage::Local;
        let uri = storage.destination_uri(&t);
        assert_eq!(uri, format!("file://{}", target.to_str().unwrap()));
        assert!(!storage.exists(&uri).await.unwrap());

        tokio::fs::create_dir_all(target.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&target, b"data").await.unwrap();
        assert!(storage.exists(&uri).await.unwrap());
    }

    #[tokio::test]
    async fn manifest_persisted_under_manifest_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Destination::LocalDirectory {
            root: dir.path().to_str().unwrap().to_string(),
        };
        let storage = Storage::Local;
        storage
            .put_manifest(&destination, "run-123", b"{}")
            .await
            .unwrap();
        let path = dir.path().join("_manifest/run-123.json");
        assert!(path.exists());
    }
}

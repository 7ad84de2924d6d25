//! Task Planner (C3).
//!
//! Expands a [`NormalizedRequest`] against the [`AvailabilityMatrix`] into a deduplicated,
//! deterministically ordered list of [`TransferTask`]s.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::{self, NormalizedRequest};
use crate::matrix::{expand_template, AvailabilityMatrix, Market, Partition};

/// All dimensions that produced a task, preserved for the manifest and for idempotency
/// checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub market: Market,
    pub data_type: String,
    pub symbol: String,
    pub interval: Option<String>,
    pub date: String,
    pub partition: Partition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    pub source_uri: String,
    pub target_key: String,
    pub checksum_source_uri: Option<String>,
    pub expected_size_hint: Option<u64>,
    pub context: TaskContext,
}

/// Terminal outcome of attempting to transfer (or skip) a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Copied,
    SkippedExisting,
    ChecksumMismatch,
    SourceMissing,
    TransientError,
    PermanentError,
}

impl TaskOutcome {
    /// `true` for outcomes the retry policy treats as terminal successes or terminal
    /// failures; `false` only for `TransientError`, which is retried.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskOutcome::TransientError)
    }

    pub fn is_success(self) -> bool {
        matches!(self, TaskOutcome::Copied | TaskOutcome::SkippedExisting)
    }
}

/// Computes the bronze-zone destination key for a task, per §4.4's stable layout:
/// `{prefix}/bronze/{exchange}/{market}/{data_type}/{symbol}/{interval_or_empty}/{YYYY}/{MM}/{DD-or-empty}/{filename}`
#[allow(clippy::too_many_arguments)]
pub fn lakehouse_key(
    prefix: &str,
    market: Market,
    data_type: &str,
    symbol: &str,
    interval: Option<&str>,
    partition: Partition,
    date: NaiveDate,
    filename: &str,
) -> String {
    let mut parts = vec![
        prefix.trim_end_matches('/').to_string(),
        "bronze".to_string(),
        "binance".to_string(),
        market.as_str().to_string(),
        data_type.to_string(),
        symbol.to_string(),
    ];
    if let Some(interval) = interval {
        parts.push(interval.to_string());
    }
    parts.push(format!("{:04}", date.year()));
    parts.push(format!("{:02}", date.month()));
    if partition == Partition::Daily {
        parts.push(format!("{:02}", date.day()));
    }
    parts.push(filename.to_string());
    parts.into_iter().filter(|p| !p.is_empty()).collect::<Vec<_>>().join("/")
}

/// One date unit per partition: a UTC day for `daily`, a calendar month for `monthly`.
fn iter_dates(start: NaiveDate, end: NaiveDate, partition: Partition) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    match partition {
        Partition::Daily => {
            let mut cursor = start;
            while cursor <= end {
                dates.push(cursor);
                cursor = cursor.succ_opt().expect("date overflow");
            }
        }
        Partition::Monthly => {
            let mut year = start.year();
            let mut month = start.month();
            loop {
                let month_start = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
                if month_start > end {
                    break;
                }
                dates.push(month_start);
                if month == 12 {
                    year += 1;
                    month = 1;
                } else {
                    month += 1;
                }
            }
        }
    }
    dates
}

fn date_component(date: NaiveDate, partition: Partition) -> String {
    match partition {
        Partition::Daily => date.format("%Y-%m-%d").to_string(),
        Partition::Monthly => date.format("%Y-%m").to_string(),
    }
}

/// Expands `normalized` against `matrix` into a deduplicated, ordering-stable set of tasks.
/// Deterministic: calling this twice with the same inputs yields identical ordered output.
pub fn plan(normalized: &NormalizedRequest, matrix: &AvailabilityMatrix) -> Vec<TransferTask> {
    let mut tasks = Vec::new();
    let mut seen_sources = HashSet::new();

    let destination_prefix = match &normalized.destination {
        crate::config::Destination::LocalDirectory { root } => root.clone(),
        crate::config::Destination::ObjectStoreBucket { prefix, .. } => prefix.clone(),
    };

    let mut markets = normalized.markets.clone();
    markets.sort();

    let mut data_types = normalized.data_types.clone();
    data_types.sort();

    for market in &markets {
        for data_type in &data_types {
            let Some(entry) = matrix.entry(*market, data_type) else {
                continue;
            };

            let clamped_start =
                config::clamp_to_available_from(normalized.date_range.start, entry.available_from);

            let mut partitions: Vec<Partition> = normalized
                .partitions
                .iter()
                .copied()
                .filter(|p| entry.partitions.contains(p))
                .collect();
            partitions.sort();

            let mut symbols = normalized
                .symbols
                .get(market)
                .cloned()
                .unwrap_or_default();
            symbols.sort();

            let intervals = normalized
                .intervals
                .get(data_type)
                .cloned()
                .unwrap_or_else(|| vec![None]);

            for partition in &partitions {
                for symbol in &symbols {
                    for interval in &intervals {
                        for date in
                            iter_dates(clamped_start, normalized.date_range.end, *partition)
                        {
                            let mut values: HashMap<&str, String> = HashMap::new();
                            values.insert("partition", partition.to_string());
                            values.insert("market_path", market.path_segment().to_string());
                            values.insert("data_type", data_type.clone());
                            values.insert("symbol", symbol.clone());
                            if let Some(interval) = interval {
                                values.insert("interval", interval.clone());
                            }
                            values.insert("date", date_component(date, *partition));

                            let filename = expand_template(&entry.filename_pattern, &values);
                            values.insert("filename", filename.clone());
                            let source = expand_template(&entry.url_pattern, &values);

                            if !seen_sources.insert(source.clone()) {
                                continue;
                            }

                            let target = lakehouse_key(
                                &destination_prefix,
                                *market,
                                data_type,
                                symbol,
                                interval.as_deref(),
                                *partition,
                                date,
                                &filename,
                            );

                            let checksum_source_uri = matrix
                                .file_format
                                .checksum_files
                                .then(|| format!("{source}.CHECKSUM"));

                            tasks.push(TransferTask {
                                source_uri: source,
                                target_key: target,
                                checksum_source_uri,
                                expected_size_hint: None,
                                context: TaskContext {
                                    market: *market,
                                    data_type: data_type.clone(),
                                    symbol: symbol.clone(),
                                    interval: interval.clone(),
                                    date: date_component(date, *partition),
                                    partition: *partition,
                                },
                            });
                        }
                    }
                }
            }
        }
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{validate, CollectionRequest, DateRange, Destination, Mode, Symbols};
    use crate::matrix::AvailabilityMatrix;
    use std::collections::HashMap as Map;

    fn matrix() -> AvailabilityMatrix {
        AvailabilityMatrix::parse(
            r#"{
                "availability_matrix": [{
                    "market": "spot",
                    "data_type": "klines",
                    "intervals": ["1h"],
                    "partitions": ["daily"],
                    "available_from": "2017-08-17",
                    "url_pattern": "https://data.binance.vision/data/{market_path}/{partition}/{data_type}/{symbol}/{interval}/{filename}",
                    "filename_pattern": "{symbol}-{interval}-{date}.zip"
                }],
                "symbols": { "spot": ["BTCUSDT"] },
                "file_format": { "compression": "zip", "content_format": "csv", "checksum_files": true }
            }"#,
        )
        .unwrap()
    }

    fn request() -> CollectionRequest {
        CollectionRequest {
            markets: vec![Market::Spot],
            symbols: Symbols::Flat(vec!["BTCUSDT".into()]),
            data_types: vec!["klines".into()],
            intervals: Map::new(),
            date_range: Some(DateRange {
                start: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
                end: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
            }),
            partitions: vec![Partition::Daily],
            destination: Destination::LocalDirectory { root: "/tmp/out".into() },
            batch_size: None,
            max_concurrency: None,
            timeout_secs: None,
            verify_checksum: false,
            force: false,
            mode: Mode::Auto,
            incremental: true,
        }
    }

    #[test]
    fn scenario_single_day_single_symbol_spot_klines() {
        let normalized = validate(&request(), &matrix()).unwrap();
        let tasks = plan(&normalized, &matrix());
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0]
            .source_uri
            .ends_with("spot/daily/klines/BTCUSDT/1h/BTCUSDT-1h-2025-07-15.zip"));
        assert!(tasks[0]
            .target_key
            .contains("spot/klines/BTCUSDT/1h/2025/07/15/"));
    }

    #[test]
    fn scenario_monthly_requested_only_daily_available() {
        let mut req = request();
        req.partitions = vec![Partition::Daily, Partition::Monthly];
        let normalized = validate(&req, &matrix()).unwrap();
        let tasks = plan(&normalized, &matrix());
        // matrix entry only has `daily`, so no monthly tasks are emitted and no error occurs.
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].context.partition, Partition::Daily);
    }

    #[test]
    fn available_from_after_end_yields_zero_tasks() {
        let mut req = request();
        req.date_range = Some(DateRange {
            start: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
        });
        let normalized = validate(&req, &matrix()).unwrap();
        let tasks = plan(&normalized, &matrix());
        assert!(tasks.is_empty());
    }

    #[test]
    fn planning_is_deterministic() {
        let normalized = validate(&request(), &matrix()).unwrap();
        let a = plan(&normalized, &matrix());
        let b = plan(&normalized, &matrix());
        let a_sources: Vec<_> = a.iter().map(|t| t.source_uri.clone()).collect();
        let b_sources: Vec<_> = b.iter().map(|t| t.source_uri.clone()).collect();
        assert_eq!(a_sources, b_sources);
    }

    #[test]
    fn no_duplicate_source_uris() {
        let normalized = validate(&request(), &matrix()).unwrap();
        let tasks = plan(&normalized, &matrix());
        let mut sources: Vec<_> = tasks.iter().map(|t| t.source_uri.clone()).collect();
        let before = sources.len();
        sources.sort();
        sources.dedup();
        assert_eq!(sources.len(), before);
    }

    #[test]
    fn destination_uri_starts_with_configured_prefix() {
        let normalized = validate(&request(), &matrix()).unwrap();
        let tasks = plan(&normalized, &matrix());
        for task in &tasks {
            assert!(task.target_key.starts_with("/tmp/out"));
        }
    }
}

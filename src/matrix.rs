//! Archive Availability Model (C1).
//!
//! The matrix is the single source of truth for task enumeration: what markets and data
//! types the archive serves, which intervals and partitions are valid, and how to turn a
//! (market, data_type, symbol, interval, date) tuple into a concrete source URL.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Closed set of markets the archive serves. Data types are deliberately left open
/// (free-form strings keyed against the matrix) since the vendor adds them faster than a
/// closed enum could track; markets do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum Market {
    Spot,
    FuturesUm,
    FuturesCm,
    Options,
}

impl Market {
    /// The path segment this market contributes to a source URL, per §4.3.
    pub fn path_segment(self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::FuturesUm => "futures/um",
            Market::FuturesCm => "futures/cm",
            Market::Options => "option",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Market::Spot => "spot",
            Market::FuturesUm => "futures_um",
            Market::FuturesCm => "futures_cm",
            Market::Options => "options",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum Partition {
    Daily,
    Monthly,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Daily => write!(f, "daily"),
            Partition::Monthly => write!(f, "monthly"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AvailabilityEntry {
    pub market: Market,
    pub data_type: String,
    /// `[None]` means "no interval dimension" — the URL/filename templates must not
    /// reference `{interval}` in that case.
    pub intervals: Vec<Option<String>>,
    pub partitions: Vec<Partition>,
    pub available_from: chrono::NaiveDate,
    pub url_pattern: String,
    pub filename_pattern: String,
}

impl AvailabilityEntry {
    fn validate(&self, index: usize) -> Result<(), CoreError> {
        let path = |field: &str| format!("availability_matrix[{index}].{field}");

        if self.data_type.trim().is_empty() {
            return Err(CoreError::MatrixInvalid(format!(
                "{}: data_type must not be empty",
                path("data_type")
            )));
        }
        if self.intervals.is_empty() {
            return Err(CoreError::MatrixInvalid(format!(
                "{}: intervals must not be empty",
                path("intervals")
            )));
        }
        if self.partitions.is_empty() {
            return Err(CoreError::MatrixInvalid(format!(
                "{}: partitions must not be empty",
                path("partitions")
            )));
        }
        if self.url_pattern.trim().is_empty() {
            return Err(CoreError::MatrixInvalid(format!(
                "{}: url_pattern must not be empty",
                path("url_pattern")
            )));
        }
        if self.filename_pattern.trim().is_empty() {
            return Err(CoreError::MatrixInvalid(format!(
                "{}: filename_pattern must not be empty",
                path("filename_pattern")
            )));
        }

        let no_interval_dimension = self.intervals.len() == 1 && self.intervals[0].is_none();
        if no_interval_dimension {
            if self.url_pattern.contains("{interval}") || self.filename_pattern.contains("{interval}")
            {
                return Err(CoreError::MatrixInvalid(format!(
                    "{}: intervals is [null] but template references {{interval}}",
                    path("url_pattern")
                )));
            }
        } else if self.intervals.iter().any(Option::is_none) {
            return Err(CoreError::MatrixInvalid(format!(
                "{}: intervals mixes null and non-null values",
                path("intervals")
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileFormat {
    pub compression: String,
    pub content_format: String,
    pub checksum_files: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawMatrix {
    availability_matrix: Vec<AvailabilityEntry>,
    #[serde(default)]
    symbols: HashMap<String, Vec<String>>,
    file_format: FileFormat,
}

/// The loaded, validated, immutable availability matrix for a run.
#[derive(Debug)]
pub struct AvailabilityMatrix {
    entries: HashMap<(Market, String), AvailabilityEntry>,
    symbols: HashMap<String, Vec<String>>,
    pub file_format: FileFormat,
}

impl AvailabilityMatrix {
    /// Parses and validates the matrix file. Fails fast on the first structural error with
    /// a path-prefixed message, per C1's contract.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoreError::MatrixInvalid(format!("{}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, CoreError> {
        let raw: RawMatrix = serde_json::from_str(contents)
            .map_err(|e| CoreError::MatrixInvalid(format!("availability_matrix: {e}")))?;

        let mut entries = HashMap::with_capacity(raw.availability_matrix.len());
        for (index, entry) in raw.availability_matrix.into_iter().enumerate() {
            entry.validate(index)?;
            let key = (entry.market, entry.data_type.clone());
            if entries.insert(key.clone(), entry).is_some() {
                return Err(CoreError::MatrixInvalid(format!(
                    "availability_matrix: duplicate entry for market={:?} data_type={}",
                    key.0, key.1
                )));
            }
        }

        Ok(Self {
            entries,
            symbols: raw.symbols,
            file_format: raw.file_format,
        })
    }

    pub fn entry(&self, market: Market, data_type: &str) -> Option<&AvailabilityEntry> {
        self.entries.get(&(market, data_type.to_string()))
    }

    pub fn symbols_for(&self, market: Market) -> &[String] {
        self.symbols
            .get(market.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Expands a template string (`{market_path}`, `{data_type}`, `{symbol}`, `{interval}`,
/// `{date}`, `{partition}`, `{filename}`) against a set of named values.
pub fn expand_template(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if let Some(value) = values.get(name) {
                    out.push_str(value);
                } else {
                    // Unknown placeholder: leave it verbatim so a template bug is visible
                    // rather than silently swallowed.
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix_json() -> &'static str {
        r#"{
            "availability_matrix": [
                {
                    "market": "spot",
                    "data_type": "klines",
                    "intervals": ["1h", "1d"],
                    "partitions": ["daily", "monthly"],
                    "available_from": "2017-08-17",
                    "url_pattern": "https://data.binance.vision/data/{partition}/{market_path}/{data_type}/{symbol}/{interval}/{filename}",
                    "filename_pattern": "{symbol}-{interval}-{date}.zip"
                },
                {
                    "market": "spot",
                    "data_type": "fundingRate",
                    "intervals": [null],
                    "partitions": ["monthly"],
                    "available_from": "2020-01-01",
                    "url_pattern": "https://data.binance.vision/data/{partition}/{market_path}/{data_type}/{symbol}/{filename}",
                    "filename_pattern": "{symbol}-fundingRate-{date}.zip"
                }
            ],
            "symbols": { "spot": ["BTCUSDT", "ETHUSDT"] },
            "file_format": { "compression": "zip", "content_format": "csv", "checksum_files": true }
        }"#
    }

    #[test]
    fn loads_valid_matrix() {
        let matrix = AvailabilityMatrix::parse(sample_matrix_json()).unwrap();
        assert!(matrix.entry(Market::Spot, "klines").is_some());
        assert!(matrix.entry(Market::Spot, "missing").is_none());
        assert_eq!(matrix.symbols_for(Market::Spot), &["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn rejects_interval_placeholder_with_null_intervals() {
        let bad = r#"{
            "availability_matrix": [{
                "market": "spot",
                "data_type": "fundingRate",
                "intervals": [null],
                "partitions": ["monthly"],
                "available_from": "2020-01-01",
                "url_pattern": "https://x/{interval}/{filename}",
                "filename_pattern": "{symbol}-{date}.zip"
            }],
            "symbols": {},
            "file_format": { "compression": "zip", "content_format": "csv", "checksum_files": false }
        }"#;
        let err = AvailabilityMatrix::parse(bad).unwrap_err();
        assert!(matches!(err, CoreError::MatrixInvalid(_)));
    }

    #[test]
    fn rejects_empty_intervals() {
        let bad = r#"{
            "availability_matrix": [{
                "market": "spot",
                "data_type": "klines",
                "intervals": [],
                "partitions": ["daily"],
                "available_from": "2020-01-01",
                "url_pattern": "https://x/{filename}",
                "filename_pattern": "{symbol}-{date}.zip"
            }],
            "symbols": {},
            "file_format": { "compression": "zip", "content_format": "csv", "checksum_files": false }
        }"#;
        assert!(AvailabilityMatrix::parse(bad).is_err());
    }

    #[test]
    fn expand_template_substitutes_known_placeholders() {
        let mut values = HashMap::new();
        values.insert("symbol", "BTCUSDT".to_string());
        values.insert("date", "2025-07-15".to_string());
        let out = expand_template("{symbol}-{interval}-{date}.zip", &values);
        assert_eq!(out, "BTCUSDT-{interval}-2025-07-15.zip");
    }
}

//! Config Validator (C2).
//!
//! Normalizes a user-supplied [`CollectionRequest`] against the loaded matrix into a
//! [`NormalizedRequest`] the planner can expand without re-checking defaults.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::matrix::{AvailabilityMatrix, Market, Partition};

const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_BATCH_SIZE: usize = 100;
const MAX_MAX_CONCURRENCY: usize = 64;
const MAX_BATCH_SIZE: usize = 500;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[clap(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Auto,
    Direct,
    Hybrid,
    Traditional,
}

/// Either a flat symbol list (applied to every requested market) or a per-market map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Symbols {
    Flat(Vec<String>),
    PerMarket(HashMap<Market, Vec<String>>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    LocalDirectory { root: String },
    ObjectStoreBucket {
        bucket: String,
        prefix: String,
        region: Option<String>,
    },
}

impl Destination {
    pub fn is_object_store(&self) -> bool {
        matches!(self, Destination::ObjectStoreBucket { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRequest {
    pub markets: Vec<Market>,
    pub symbols: Symbols,
    pub data_types: Vec<String>,
    #[serde(default)]
    pub intervals: HashMap<String, Vec<Option<String>>>,
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    pub destination: Destination,
    pub batch_size: Option<usize>,
    pub max_concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub verify_checksum: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_true")]
    pub incremental: bool,
}

fn default_true() -> bool {
    true
}

/// A request whose defaults have been applied and whose shape has been validated against
/// the matrix. The planner consumes this, not the raw [`CollectionRequest`].
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub markets: Vec<Market>,
    pub symbols: HashMap<Market, Vec<String>>,
    pub data_types: Vec<String>,
    pub intervals: HashMap<String, Vec<Option<String>>>,
    pub date_range: DateRange,
    pub partitions: Vec<Partition>,
    pub destination: Destination,
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub timeout_secs: u64,
    pub verify_checksum: bool,
    pub force: bool,
    pub mode: Mode,
    pub incremental: bool,
}

/// Validates `request` against `matrix`, applying the defaulting rules from the config
/// validator's contract. Every requested (market, data_type) pair must exist in the matrix
/// for at least one requested market, or validation fails.
pub fn validate(
    request: &CollectionRequest,
    matrix: &AvailabilityMatrix,
) -> Result<NormalizedRequest, CoreError> {
    if request.markets.is_empty() {
        return Err(CoreError::ConfigInvalid("markets must not be empty".into()));
    }
    if request.data_types.is_empty() {
        return Err(CoreError::ConfigInvalid(
            "data_types must not be empty".into(),
        ));
    }

    let symbols = expand_symbols(&request.symbols, &request.markets);

    for data_type in &request.data_types {
        let offered = request
            .markets
            .iter()
            .any(|market| matrix.entry(*market, data_type).is_some());
        if !offered {
            return Err(CoreError::ConfigInvalid(format!(
                "data_type {data_type:?} does not exist in the matrix for any requested market {:?}",
                request.markets
            )));
        }
    }

    let mut intervals = HashMap::new();
    for data_type in &request.data_types {
        let requested = request.intervals.get(data_type);

        // Find a representative entry for this data type to check intervals against.
        let entry = request
            .markets
            .iter()
            .find_map(|m| matrix.entry(*m, data_type));

        let Some(entry) = entry else {
            // Not offered by any requested market; the planner silently skips it.
            continue;
        };

        let resolved = match requested {
            Some(values) => {
                for value in values {
                    if !entry.intervals.contains(value) {
                        return Err(CoreError::ConfigInvalid(format!(
                            "interval {value:?} is not valid for data_type {data_type}"
                        )));
                    }
                }
                values.clone()
            }
            None => vec![entry.intervals[0].clone()],
        };
        intervals.insert(data_type.clone(), resolved);
    }

    let date_range = match &request.date_range {
        Some(range) => range.clone(),
        None => {
            let today = chrono::Utc::now().date_naive();
            DateRange {
                start: today,
                end: today,
            }
        }
    };
    if date_range.end < date_range.start {
        return Err(CoreError::ConfigInvalid(
            "date_range.end must not be before date_range.start".into(),
        ));
    }

    let partitions = if request.partitions.is_empty() {
        vec![Partition::Daily]
    } else {
        request.partitions.clone()
    };

    let max_concurrency = match request.max_concurrency {
        None => DEFAULT_MAX_CONCURRENCY,
        Some(0) => {
            return Err(CoreError::ConfigInvalid(
                "max_concurrency must be > 0".into(),
            ))
        }
        Some(v) if v > MAX_MAX_CONCURRENCY => {
            return Err(CoreError::ConfigInvalid(format!(
                "max_concurrency must be <= {MAX_MAX_CONCURRENCY}"
            )))
        }
        Some(v) => v,
    };

    let batch_size = match request.batch_size {
        None => DEFAULT_BATCH_SIZE,
        Some(0) => return Err(CoreError::ConfigInvalid("batch_size must be > 0".into())),
        Some(v) if v > MAX_BATCH_SIZE => {
            return Err(CoreError::ConfigInvalid(format!(
                "batch_size must be <= {MAX_BATCH_SIZE}"
            )))
        }
        Some(v) => v,
    };

    Ok(NormalizedRequest {
        markets: request.markets.clone(),
        symbols,
        data_types: request.data_types.clone(),
        intervals,
        date_range,
        partitions,
        destination: request.destination.clone(),
        batch_size,
        max_concurrency,
        timeout_secs: request.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        verify_checksum: request.verify_checksum,
        force: request.force,
        mode: request.mode,
        incremental: request.incremental,
    })
}

fn expand_symbols(symbols: &Symbols, markets: &[Market]) -> HashMap<Market, Vec<String>> {
    match symbols {
        Symbols::Flat(list) => markets
            .iter()
            .map(|m| (*m, list.clone()))
            .collect(),
        Symbols::PerMarket(map) => map.clone(),
    }
}

/// Clamps a requested date-range start to a matrix entry's earliest availability date. Used
/// by the planner per (market, data_type) entry before enumerating dates: an entry's
/// unavailable history is data availability, not an error, per §4.2.
pub fn clamp_to_available_from(start: NaiveDate, available_from: NaiveDate) -> NaiveDate {
    start.max(available_from)
}

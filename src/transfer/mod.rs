//! Strategies for moving bytes (or object-to-object copies) from the archive to the
//! destination, plus the tool adapter and mode selector that choose between them.

pub mod direct;
pub mod selector;
pub mod tool;
pub mod traditional;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::planner::{TaskOutcome, TransferTask};

/// Which strategy actually executed a task. Distinct from [`crate::config::Mode`]: a run in
/// `hybrid` or `auto` mode may use either strategy per task or per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DirectSync,
    Traditional,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::DirectSync => write!(f, "direct_sync"),
            Strategy::Traditional => write!(f, "traditional"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: TransferTask,
    pub outcome: TaskOutcome,
    pub bytes_transferred: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub attempts: u32,
    pub strategy_used: Strategy,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

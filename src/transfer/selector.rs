//! Mode Selector (C7).
//!
//! Deterministic, stateless choice between the direct-sync and traditional strategies.
//! `direct`/`traditional`/`auto` are uniform per batch; `hybrid` splits a batch by each
//! task's source scheme, so it is exposed as a per-task decision the executor applies
//! across the batch.

use crate::config::{Destination, Mode};
use crate::error::CoreError;
use crate::transfer::Strategy;

pub fn is_s3_uri(uri: &str) -> bool {
    uri.starts_with("s3://")
}

/// Batch-uniform decision for `direct`/`traditional`/`auto`. `hybrid` is handled by
/// [`select_for_task`] instead, since its rule is per-task.
pub fn select(
    mode: Mode,
    destination: &Destination,
    tool_available: bool,
) -> Result<Strategy, CoreError> {
    match mode {
        Mode::Direct => {
            if destination.is_object_store() {
                Ok(Strategy::DirectSync)
            } else {
                Err(CoreError::IncompatibleMode(
                    "direct mode requires an S3-compatible destination".into(),
                ))
            }
        }
        Mode::Traditional => Ok(Strategy::Traditional),
        Mode::Auto => {
            if destination.is_object_store() && tool_available {
                Ok(Strategy::DirectSync)
            } else {
                Ok(Strategy::Traditional)
            }
        }
        Mode::Hybrid => {
            unreachable!("hybrid mode is resolved per task via select_for_task")
        }
    }
}

/// Per-task strategy for `hybrid` mode: direct-sync only when both the task's source and
/// the run's destination are S3-compatible, traditional otherwise.
pub fn select_for_task(source_uri: &str, destination: &Destination) -> Strategy {
    if is_s3_uri(source_uri) && destination.is_object_store() {
        Strategy::DirectSync
    } else {
        Strategy::Traditional
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_destination() -> Destination {
        Destination::ObjectStoreBucket {
            bucket: "b".into(),
            prefix: "p".into(),
            region: None,
        }
    }

    fn local_destination() -> Destination {
        Destination::LocalDirectory { root: "/tmp".into() }
    }

    #[test]
    fn direct_mode_fails_fast_on_local_destination() {
        let err = select(Mode::Direct, &local_destination(), true).unwrap_err();
        assert!(matches!(err, CoreError::IncompatibleMode(_)));
    }

    #[test]
    fn direct_mode_succeeds_on_object_store() {
        assert_eq!(
            select(Mode::Direct, &s3_destination(), true).unwrap(),
            Strategy::DirectSync
        );
    }

    #[test]
    fn auto_mode_downgrades_when_tool_unavailable() {
        assert_eq!(
            select(Mode::Auto, &s3_destination(), false).unwrap(),
            Strategy::Traditional
        );
    }

    #[test]
    fn auto_mode_uses_direct_sync_when_possible() {
        assert_eq!(
            select(Mode::Auto, &s3_destination(), true).unwrap(),
            Strategy::DirectSync
        );
    }

    #[test]
    fn hybrid_uses_direct_sync_only_when_source_and_destination_are_both_s3() {
        assert_eq!(
            select_for_task("s3://archive/x.zip", &s3_destination()),
            Strategy::DirectSync
        );
        assert_eq!(
            select_for_task("https://archive/x.zip", &s3_destination()),
            Strategy::Traditional
        );
        assert_eq!(
            select_for_task("s3://archive/x.zip", &local_destination()),
            Strategy::Traditional
        );
    }
}

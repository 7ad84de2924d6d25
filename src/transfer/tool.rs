//! Transfer Tool Adapter (C4).
//!
//! Wraps the external bulk transfer tool (e.g. `s5cmd`): writes a batch file of one copy
//! command per line, invokes the tool, and parses per-line outcomes out of its stderr.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::CoreError;
use crate::planner::TaskOutcome;

/// One line of the batch file: a single `source -> destination` copy, plus the flags the
/// tool contract (§6.4) describes.
#[derive(Debug, Clone)]
pub struct CopyLine {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone)]
pub struct ToolOptions {
    pub worker_count: usize,
    pub retry_count: u32,
    pub part_size_bytes: u64,
    pub unsigned_request: bool,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            worker_count: 8,
            retry_count: 3,
            part_size_bytes: 50 * 1024 * 1024,
            unsigned_request: false,
        }
    }
}

/// Outcome of a single batch-file line, as reported by the tool's stderr diagnostics (or
/// inferred when the line could not be parsed).
#[derive(Debug, Clone)]
pub struct LineOutcome {
    pub destination: String,
    pub outcome: TaskOutcome,
}

pub struct ToolAdapter {
    binary: String,
}

impl ToolAdapter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Cheap availability check: the tool is on PATH and responds to `--version`.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Writes `lines` to a temporary batch file, invokes the tool, and parses the outcome
    /// per line. The batch file is removed when this function returns, regardless of
    /// outcome, since `NamedTempFile` is dropped at the end of scope.
    pub async fn run_batch(
        &self,
        lines: &[CopyLine],
        opts: &ToolOptions,
        timeout: Duration,
    ) -> Result<Vec<LineOutcome>, CoreError> {
        let mut batch_file = tempfile::NamedTempFile::new()
            .map_err(|e| CoreError::StorageError(format!("batch file: {e}")))?;

        {
            use std::io::Write;
            for line in lines {
                let mut cmd = format!("cp --if-size-differ {} {}", line.source, line.destination);
                if opts.unsigned_request {
                    cmd.push_str(" --source-region auto");
                }
                writeln!(batch_file, "{cmd}")
                    .map_err(|e| CoreError::StorageError(format!("batch file: {e}")))?;
            }
            batch_file
                .flush()
                .map_err(|e| CoreError::StorageError(format!("batch file: {e}")))?;
        }

        let mut command = Command::new(&self.binary);
        command
            .kill_on_drop(true)
            .arg("run")
            .arg(batch_file.path())
            .arg("--numworkers")
            .arg(opts.worker_count.to_string())
            .arg("--retry-count")
            .arg(opts.retry_count.to_string())
            .arg("--part-size")
            .arg(opts.part_size_bytes.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if opts.unsigned_request {
            command.arg("--no-sign-request");
        }

        let child = command.spawn().map_err(|e| {
            CoreError::ToolUnavailable(format!("{}: {e}", self.binary))
        })?;

        let wait = tokio::time::timeout(timeout, child.wait_with_output());
        let output = match wait.await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(CoreError::TransientError(e.to_string())),
            Err(_) => return Err(CoreError::TransientError("tool invocation timed out".into())),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let parsed = parse_outcomes(&stderr, lines);

        if output.status.success() {
            Ok(lines
                .iter()
                .map(|l| LineOutcome {
                    destination: l.destination.clone(),
                    outcome: parsed
                        .iter()
                        .find(|p| p.destination == l.destination)
                        .map(|p| p.outcome)
                        .unwrap_or(TaskOutcome::Copied),
                })
                .collect())
        } else if parsed.is_empty() {
            // Non-zero exit with no structured diagnostics: every line is unparseable,
            // treated as transient per §4.5.
            Ok(lines
                .iter()
                .map(|l| LineOutcome {
                    destination: l.destination.clone(),
                    outcome: TaskOutcome::TransientError,
                })
                .collect())
        } else {
            Ok(lines
                .iter()
                .map(|l| LineOutcome {
                    destination: l.destination.clone(),
                    outcome: parsed
                        .iter()
                        .find(|p| p.destination == l.destination)
                        .map(|p| p.outcome)
                        .unwrap_or(TaskOutcome::TransientError),
                })
                .collect())
        }
    }
}

/// Parses per-line outcomes from the tool's stderr. The exact diagnostic format is
/// tool-specific; this recognizes the common `ERROR "<dst>": <reason>` and `OK "<dst>"`
/// shapes and falls back to leaving a line unparsed when the format is unrecognized.
fn parse_outcomes(stderr: &str, lines: &[CopyLine]) -> Vec<LineOutcome> {
    let mut outcomes = Vec::new();
    for raw_line in stderr.lines() {
        for copy_line in lines {
            if raw_line.contains(&copy_line.destination) {
                let outcome = if raw_line.contains("404") || raw_line.to_lowercase().contains("not found")
                {
                    TaskOutcome::SourceMissing
                } else if raw_line.contains("403") || raw_line.to_lowercase().contains("denied") {
                    TaskOutcome::PermanentError
                } else if raw_line.to_lowercase().contains("ok") {
                    TaskOutcome::Copied
                } else {
                    TaskOutcome::TransientError
                };
                outcomes.push(LineOutcome {
                    destination: copy_line.destination.clone(),
                    outcome,
                });
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tool_reports_unavailable() {
        let adapter = ToolAdapter::new("archive-collector-nonexistent-tool-xyz");
        assert!(!adapter.is_available().await);
        let err = adapter
            .run_batch(&[], &ToolOptions::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn successful_batch_via_true_binary() {
        let adapter = ToolAdapter::new("/bin/true");
        let lines = vec![CopyLine {
            source: "s3://src/a.zip".into(),
            destination: "s3://dst/a.zip".into(),
        }];
        let outcomes = adapter
            .run_batch(&lines, &ToolOptions::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].outcome, TaskOutcome::Copied);
    }

    #[tokio::test]
    async fn failing_batch_via_false_binary_is_transient_without_diagnostics() {
        let adapter = ToolAdapter::new("/bin/false");
        let lines = vec![CopyLine {
            source: "s3://src/a.zip".into(),
            destination: "s3://dst/a.zip".into(),
        }];
        let outcomes = adapter
            .run_batch(&lines, &ToolOptions::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcomes[0].outcome, TaskOutcome::TransientError);
    }

    #[test]
    fn parses_structured_diagnostics() {
        let lines = vec![CopyLine {
            source: "s3://src/a.zip".into(),
            destination: "s3://dst/a.zip".into(),
        }];
        let stderr = "ERROR \"s3://dst/a.zip\": 404 not found";
        let outcomes = parse_outcomes(stderr, &lines);
        assert_eq!(outcomes[0].outcome, TaskOutcome::SourceMissing);
    }
}

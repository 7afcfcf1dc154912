//! Running one external stage process

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::JobError;
use crate::domain::StageKind;

/// How much of a failed stage's stderr ends up in the diagnostic
const STDERR_TAIL_CHARS: usize = 500;

/// Fully resolved command line of a stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageInvocation {
    pub stage: StageKind,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// How a launched stage ended
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        signal: Option<i32>,
        stderr_tail: String,
    },
    TimedOut(Duration),
    Cancelled,
}

impl StageOutcome {
    /// Human-readable diagnostic for the progress ledger
    pub fn describe(&self, stage: StageKind) -> String {
        match self {
            Self::Succeeded => format!("{} finished", stage),
            Self::Failed {
                exit_code,
                signal,
                stderr_tail,
            } => {
                let status = match (exit_code, signal) {
                    (Some(code), _) => format!("exited with code {}", code),
                    (None, Some(signal)) => format!("killed by signal {}", signal),
                    (None, None) => "exited abnormally".to_string(),
                };
                if stderr_tail.is_empty() {
                    format!("{} {}", stage, status)
                } else {
                    format!("{} {}: {}", stage, status, stderr_tail)
                }
            }
            Self::TimedOut(limit) => format!("{} timed out after {}ms", stage, limit.as_millis()),
            Self::Cancelled => "cancelled: superseded".to_string(),
        }
    }
}

/// Run a stage to completion, a timeout, or cancellation
///
/// The child is killed if it is still running when this returns early.
/// `Err` only for a launch failure.
pub async fn run_stage(
    invocation: &StageInvocation,
    timeout: Option<Duration>,
    cancel: &mut watch::Receiver<bool>,
) -> Result<StageOutcome, JobError> {
    debug!(stage = %invocation.stage, program = %invocation.program, args = ?invocation.args, "run_stage: launching");

    let child = Command::new(&invocation.program)
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| JobError::Launch {
            stage: invocation.stage,
            program: invocation.program.clone(),
            source,
        })?;

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    let cancelled = async {
        // A dropped sender means nobody can cancel any more
        if cancel.wait_for(|flag| *flag).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        output = child.wait_with_output() => {
            let output = output.map_err(|source| JobError::Launch {
                stage: invocation.stage,
                program: invocation.program.clone(),
                source,
            })?;
            let outcome = classify(output.status, &output.stderr);
            info!(stage = %invocation.stage, ?outcome, "run_stage: finished");
            Ok(outcome)
        }
        _ = deadline => {
            warn!(stage = %invocation.stage, ?timeout, "run_stage: timed out, killing");
            Ok(StageOutcome::TimedOut(timeout.unwrap_or_default()))
        }
        _ = cancelled => {
            info!(stage = %invocation.stage, "run_stage: cancelled, killing");
            Ok(StageOutcome::Cancelled)
        }
    }
}

fn classify(status: ExitStatus, stderr: &[u8]) -> StageOutcome {
    if status.success() {
        return StageOutcome::Succeeded;
    }
    StageOutcome::Failed {
        exit_code: status.code(),
        signal: signal_of(&status),
        stderr_tail: tail(&String::from_utf8_lossy(stderr), STDERR_TAIL_CHARS),
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_: &ExitStatus) -> Option<i32> {
    None
}

/// Last `max` characters of `text`, trimmed
fn tail(text: &str, max: usize) -> String {
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(max);
    text.chars().skip(skip).collect()
}

//! Job orchestration
//!
//! A job runs the extraction and generation stages one after the other as
//! external processes. Progress is published through a per-job JSON file
//! (the ledger) that the stages also write into, and the latest job of each
//! conversation is tracked in an in-memory registry so clients can poll by
//! conversation as well as by job id.

mod ledger;
mod orchestrator;
mod registry;
mod stage;

use thiserror::Error;

use crate::domain::{ConversationRef, JobId, StageKind};

pub use ledger::{ProgressLedger, ProgressRecord, ProgressStage};
pub use orchestrator::{JobOrchestrator, JobRequest, OrchestratorSettings, ProgressQuery};
pub use registry::{JobRegistry, Registration};
pub use stage::{StageInvocation, StageOutcome, run_stage};

/// Errors from starting a job
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job {job_id} is still running for conversation {conversation}")]
    AlreadyRunning {
        conversation: ConversationRef,
        job_id: JobId,
    },

    #[error("Failed to write progress for job {job_id}: {source}")]
    Ledger {
        job_id: JobId,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch {stage} stage ({program}): {source}")]
    Launch {
        stage: StageKind,
        program: String,
        #[source]
        source: std::io::Error,
    },
}

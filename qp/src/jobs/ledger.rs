//! Progress ledger: one `{stage, message}` JSON file per job
//!
//! Files are replaced atomically (temp file + rename) and never deleted.
//! Readers treat a missing or unparseable file as `unknown`. The stage
//! processes write into the same file with their own stage names, which are
//! folded onto ours when read.
//!
//! The stage scripts also write `done` and `error` of their own, so a record
//! alone cannot say which stage is running. Every record this side writes
//! also updates `<id>.stage`, a marker holding our own stage. While the
//! marker names a running stage, the record read back carries that stage.
//!
//! Next to the records, `latest/<user>_<conversation>` holds the id of the
//! conversation's newest job so processes other than the one that started it
//! can still poll by conversation.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{ConversationRef, JobId, StageKind};

/// Stage column of a progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    #[serde(alias = "analysis", alias = "qg")]
    Extraction,
    #[serde(alias = "qa")]
    Generation,
    Done,
    Error,
    #[serde(other)]
    Unknown,
}

impl ProgressStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl From<StageKind> for ProgressStage {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Extraction => Self::Extraction,
            StageKind::Generation => Self::Generation,
        }
    }
}

impl std::fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Extraction => "extraction",
            Self::Generation => "generation",
            Self::Done => "done",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Latest progress snapshot of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub stage: ProgressStage,
    #[serde(default)]
    pub message: String,
}

impl ProgressRecord {
    pub fn new(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    /// Sentinel for anything that cannot be resolved
    pub fn unknown() -> Self {
        Self::new(ProgressStage::Unknown, "")
    }

    pub fn starting(stage: StageKind) -> Self {
        Self::new(stage.into(), "starting")
    }

    pub fn done() -> Self {
        Self::new(ProgressStage::Done, "complete")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ProgressStage::Error, message)
    }
}

/// Directory of per-job progress files
#[derive(Debug, Clone)]
pub struct ProgressLedger {
    dir: PathBuf,
}

impl ProgressLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File the job's record lives in (also handed to the stages)
    pub fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }

    fn marker_path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.stage", job_id))
    }

    fn latest_path(&self, owner: ConversationRef) -> PathBuf {
        self.dir
            .join("latest")
            .join(format!("{}_{}", owner.user_id, owner.conversation_id))
    }

    /// Point the conversation at `job_id`
    pub async fn write_latest(&self, owner: ConversationRef, job_id: &JobId) -> io::Result<()> {
        let path = self.latest_path(owner);
        let dir = self.dir.join("latest");
        tokio::fs::create_dir_all(&dir).await?;
        let tmp = dir.join(format!(".{}_{}.tmp", owner.user_id, owner.conversation_id));
        tokio::fs::write(&tmp, job_id.as_str()).await?;
        tokio::fs::rename(&tmp, &path).await
    }

    /// Newest job recorded for the conversation, if any
    pub async fn read_latest(&self, owner: ConversationRef) -> Option<JobId> {
        let raw = tokio::fs::read_to_string(self.latest_path(owner)).await.ok()?;
        JobId::parse(&raw)
    }

    /// Replace the job's record
    ///
    /// A terminal record lands before its marker and a running one after
    /// it, so a reader never sees a terminal stage early.
    pub async fn write(&self, job_id: &JobId, record: &ProgressRecord) -> io::Result<()> {
        debug!(%job_id, stage = %record.stage, message = %record.message, "ledger write");
        tokio::fs::create_dir_all(&self.dir).await?;

        let body = serde_json::to_vec(record).map_err(io::Error::other)?;
        let marker = serde_json::to_vec(&record.stage).map_err(io::Error::other)?;
        if record.stage.is_terminal() {
            self.replace(job_id, "json", &body).await?;
            self.replace(job_id, "stage", &marker).await
        } else {
            self.replace(job_id, "stage", &marker).await?;
            self.replace(job_id, "json", &body).await
        }
    }

    async fn replace(&self, job_id: &JobId, ext: &str, body: &[u8]) -> io::Result<()> {
        let path = self.dir.join(format!("{}.{}", job_id, ext));
        let tmp = self.dir.join(format!(".{}.{}.tmp", job_id, ext));
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await
    }

    /// The job's record, or `unknown` if it is missing or malformed
    ///
    /// While the marker names a running stage, that stage wins over whatever
    /// the stage script last wrote.
    pub async fn read(&self, job_id: &JobId) -> ProgressRecord {
        let record = self.read_record(job_id).await;
        match self.read_marker(job_id).await {
            Some(stage @ (ProgressStage::Extraction | ProgressStage::Generation)) if stage != record.stage => {
                debug!(%job_id, written = %record.stage, running = %stage, "progress: clamped to running stage");
                ProgressRecord { stage, ..record }
            }
            _ => record,
        }
    }

    async fn read_record(&self, job_id: &JobId) -> ProgressRecord {
        let path = self.path_for(job_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(%job_id, error = %e, "malformed progress record");
                ProgressRecord::unknown()
            }),
            Err(e) => {
                debug!(%job_id, error = %e, "no progress record");
                ProgressRecord::unknown()
            }
        }
    }

    async fn read_marker(&self, job_id: &JobId) -> Option<ProgressStage> {
        let bytes = tokio::fs::read(self.marker_path(job_id)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

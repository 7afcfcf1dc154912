//! Job domain type
//!
//! A Job is one run of the extraction -> generation stage chain for the
//! input artifact of a single conversation.

use serde::{Deserialize, Serialize};

use super::{ConversationRef, now_ms};

/// Number of random bytes in a job id (hex-encoded to twice as many chars)
const JOB_ID_BYTES: usize = 16;

/// Opaque, collision-resistant job identifier (32 lowercase hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh id from 16 random bytes
    pub fn generate() -> Self {
        let bytes: [u8; JOB_ID_BYTES] = rand::random();
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Parse an externally supplied id
    ///
    /// Only well-formed ids are accepted since the id doubles as a file name
    /// in the progress ledger.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = raw.len() == JOB_ID_BYTES * 2
            && raw.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One external processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// OCR + speech recognition over the lecture video
    Extraction,
    /// Question generation from the extracted text
    Generation,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Generation => "generation",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed stage sequence every job runs through
pub const PIPELINE: [StageKind; 2] = [StageKind::Extraction, StageKind::Generation];

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// A stage process is (or is about to be) running
    #[default]
    Running,
    /// Both stages exited successfully
    Done,
    /// A stage failed to launch, exited non-zero, timed out or was cancelled
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// In-memory bookkeeping for a launched job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Conversation that triggered the job
    pub owner: ConversationRef,

    /// Course label handed to both stages
    pub course: String,

    /// Name of the input artifact (the lecture video)
    pub artifact: String,

    pub stages: Vec<StageKind>,

    /// Index into `stages` of the stage currently running (or last run)
    pub current_stage: usize,

    pub status: JobStatus,

    /// Human-readable progress string
    pub last_message: String,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Job {
    pub fn new(id: JobId, owner: ConversationRef, course: impl Into<String>, artifact: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id,
            owner,
            course: course.into(),
            artifact: artifact.into(),
            stages: PIPELINE.to_vec(),
            current_stage: 0,
            status: JobStatus::Running,
            last_message: "starting".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Stage at `current_stage`
    pub fn stage(&self) -> Option<StageKind> {
        self.stages.get(self.current_stage).copied()
    }

    /// Move on to the stage at `index`
    pub fn advance(&mut self, index: usize, message: impl Into<String>) {
        self.current_stage = index;
        self.last_message = message.into();
        self.updated_at = now_ms();
    }

    /// Record the terminal status
    pub fn finish(&mut self, status: JobStatus, message: impl Into<String>) {
        self.status = status;
        self.last_message = message.into();
        self.updated_at = now_ms();
    }
}

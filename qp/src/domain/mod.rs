//! Domain types for quizpipe
//!
//! Conversation references and persisted conversation state, uploaded
//! documents, and the Job record tracked by the orchestrator.

mod conversation;
mod job;

pub use conversation::{ConversationRef, ConversationState, Document, Metadata, NewDocument};
pub use job::{Job, JobId, JobStatus, PIPELINE, StageKind};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

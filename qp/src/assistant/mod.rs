//! Chat service
//!
//! One chat turn: load the conversation, run the dialog engine, resolve the
//! lecture video and start a job when the engine asks for it, then persist
//! the transition.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dialog::{self, Action, Branch, DialogState, keys};
use crate::domain::{ConversationRef, ConversationState, Document, JobId, Metadata};
use crate::jobs::{JobError, JobOrchestrator, JobRequest, ProgressQuery, ProgressRecord};
use crate::state::{StateError, StateManager};

/// Errors surfaced to the caller of a chat operation
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationRef),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Reply to a matched chat message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub reply: String,

    /// Dialog state after the turn
    pub state: DialogState,

    /// Job started by this turn, if any
    pub job_id: Option<JobId>,
}

/// Result of one chat turn
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Reply(ChatReply),
    /// No rule matched; the caller decides what to say (e.g. hand over to a
    /// general-purpose assistant)
    Fallback,
}

/// Drives conversations through the dialog and into the job orchestrator
#[derive(Clone)]
pub struct ChatService {
    state: StateManager,
    orchestrator: JobOrchestrator,
    default_course: String,
}

impl ChatService {
    pub fn new(state: StateManager, orchestrator: JobOrchestrator, default_course: impl Into<String>) -> Self {
        Self {
            state,
            orchestrator,
            default_course: default_course.into(),
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    /// Handle one inbound chat message
    pub async fn handle_message(&self, conversation: ConversationRef, text: &str) -> Result<ChatOutcome, AssistantError> {
        debug!(%conversation, "handle_message: called");
        let current = self
            .state
            .get_conversation(conversation)
            .await?
            .ok_or(AssistantError::ConversationNotFound(conversation))?;

        let Some(transition) = dialog::transition(text, current.current(), &current.metadata) else {
            debug!(%conversation, state = %current.current(), "handle_message: no match");
            return Ok(ChatOutcome::Fallback);
        };

        // Everything that can refuse the run is settled before the transition
        // is persisted; the job itself starts only after it is.
        let mut request = None;
        if transition.action == Some(Action::StartProcessing) {
            let metadata = current.merged_metadata(&transition.metadata_patch);
            match self.prepare_job(conversation, &metadata).await? {
                Prepared::Ready(ready) => request = Some(ready),
                Prepared::NoDocument => {
                    return Ok(self.stay(&current, "No uploaded lecture video was found. Upload one first, then type `run`."));
                }
                Prepared::Busy(running) => return Ok(self.stay(&current, busy_reply(&running))),
            }
        }

        let updated = self
            .state
            .set_conversation(conversation, transition.next_state, transition.metadata_patch)
            .await?;

        let mut reply = transition.reply;
        let mut job_id = None;
        if let Some(request) = request {
            match self.orchestrator.start_job(request).await {
                Ok(id) => {
                    reply = format!("{}\nJob {} started. Ask for progress at any time.", reply, id);
                    job_id = Some(id);
                }
                Err(JobError::AlreadyRunning { job_id: running, .. }) => {
                    warn!(%conversation, %running, "another start won the race");
                    reply = busy_reply(&running);
                }
                Err(e) => {
                    error!(%conversation, state = %updated.current(), error = %e, "transition saved but job did not start");
                    return Err(e.into());
                }
            }
        }

        Ok(ChatOutcome::Reply(ChatReply {
            reply,
            state: updated.current(),
            job_id,
        }))
    }

    /// Force a conversation into `state`, keeping its metadata
    pub async fn set_state(&self, conversation: ConversationRef, state: DialogState) -> Result<ConversationState, AssistantError> {
        info!(%conversation, %state, "set_state");
        Ok(self.state.set_conversation(conversation, state, Metadata::new()).await?)
    }

    /// Progress of a job or of the conversation's latest job
    pub async fn progress(&self, query: &ProgressQuery) -> ProgressRecord {
        self.orchestrator.progress(query).await
    }

    /// Lecture video a job should run on
    ///
    /// Uses the document recorded for the conversation's branch and falls
    /// back to the user's most recent upload.
    pub async fn resolve_artifact(&self, user_id: i64, metadata: &Metadata) -> Result<Option<Document>, AssistantError> {
        let key = match Branch::from_metadata(metadata) {
            Some(Branch::Existing) => Some(keys::SELECTED_DOC_ID),
            Some(Branch::Upload) => Some(keys::UPLOADED_DOC_ID),
            None => None,
        };

        if let Some(id) = key.and_then(|key| metadata.get(key)).and_then(document_id) {
            if let Some(document) = self.state.get_document(user_id, id).await? {
                return Ok(Some(document));
            }
            warn!(user_id, id, "recorded document is missing, using latest upload");
        }

        Ok(self.state.latest_document(user_id).await?)
    }

    async fn prepare_job(&self, conversation: ConversationRef, metadata: &Metadata) -> Result<Prepared, AssistantError> {
        let Some(document) = self.resolve_artifact(conversation.user_id, metadata).await? else {
            info!(%conversation, "no document to process");
            return Ok(Prepared::NoDocument);
        };
        if let Some(running) = self.orchestrator.blocking_job(conversation).await {
            return Ok(Prepared::Busy(running));
        }

        Ok(Prepared::Ready(JobRequest {
            owner: conversation,
            artifact_name: document.name.clone(),
            artifact_path: document.path.clone(),
            course: self.course_for(metadata, &document),
            generation: dialog::current_config(metadata),
        }))
    }

    fn course_for(&self, metadata: &Metadata, document: &Document) -> String {
        metadata
            .get(keys::COURSE_NAME)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .or_else(|| document.course_name.clone())
            .unwrap_or_else(|| self.default_course.clone())
    }

    fn stay(&self, current: &ConversationState, reply: impl Into<String>) -> ChatOutcome {
        ChatOutcome::Reply(ChatReply {
            reply: reply.into(),
            state: current.current(),
            job_id: None,
        })
    }
}

enum Prepared {
    Ready(JobRequest),
    NoDocument,
    Busy(JobId),
}

fn busy_reply(running: &JobId) -> String {
    format!(
        "Job {} is still running for this conversation. Wait for it to finish, then type `run`.",
        running
    )
}

/// Accept ids stored as numbers or numeric strings
fn document_id(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OnActiveJob, StageConfig};
    use crate::domain::{JobStatus, NewDocument};
    use crate::jobs::{JobRegistry, OrchestratorSettings, ProgressLedger};
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn sh(script: &str) -> StageConfig {
        StageConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "stage".to_string()],
            env: Default::default(),
        }
    }

    fn service(temp: &TempDir, policy: OnActiveJob) -> ChatService {
        let state = StateManager::spawn(temp.path().join("qp.db")).unwrap();
        let settings = OrchestratorSettings {
            db_path: temp.path().join("qp.db"),
            extraction: sh("exit 0"),
            generation: sh("sleep 0.2"),
            on_active_job: policy,
            stage_timeout: None,
        };
        let orchestrator = JobOrchestrator::new(settings, ProgressLedger::new(temp.path().join("progress")), JobRegistry::new());
        ChatService::new(state, orchestrator, "general")
    }

    async fn say(svc: &ChatService, conv: ConversationRef, text: &str) -> ChatReply {
        match svc.handle_message(conv, text).await.unwrap() {
            ChatOutcome::Reply(reply) => reply,
            ChatOutcome::Fallback => panic!("no match for {text:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_conversation_is_an_error() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Supersede);
        let err = svc.handle_message(ConversationRef::new(1, 42), "1-1").await.unwrap_err();
        assert!(matches!(err, AssistantError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn test_fallback_leaves_state_alone() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Supersede);
        let id = svc.state().create_conversation(1, None).await.unwrap();
        let conv = ConversationRef::new(1, id);

        let outcome = svc.handle_message(conv, "what's the weather").await.unwrap();
        assert_eq!(outcome, ChatOutcome::Fallback);
        let stored = svc.state().get_conversation(conv).await.unwrap().unwrap();
        assert_eq!(stored.state, None);
    }

    #[tokio::test]
    async fn test_existing_branch_runs_selected_document() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Supersede);
        let chosen = svc
            .state()
            .add_document(NewDocument::new(1, "week1.mp4", "/v/week1.mp4").with_course("algebra"))
            .await
            .unwrap();
        svc.state()
            .add_document(NewDocument::new(1, "week2.mp4", "/v/week2.mp4"))
            .await
            .unwrap();
        let id = svc.state().create_conversation(1, None).await.unwrap();
        let conv = ConversationRef::new(1, id);

        assert_eq!(say(&svc, conv, "1-1").await.state, DialogState::ExistingDocSelect);
        let selected = say(&svc, conv, &format!("select document: {chosen}")).await;
        assert_eq!(selected.state, DialogState::ExistingDocConfig);
        say(&svc, conv, "set: questions=5").await;

        let run = say(&svc, conv, "run").await;
        assert_eq!(run.state, DialogState::QgDone);
        let job_id = run.job_id.unwrap();

        let job = svc.orchestrator().job(&job_id).await.unwrap();
        assert_eq!(job.artifact, "week1.mp4");
        assert_eq!(job.course, "algebra");

        let stored = svc.state().get_conversation(conv).await.unwrap().unwrap();
        assert_eq!(stored.metadata[keys::QG_CONFIG]["questions"], json!(5));
        assert!(stored.metadata.contains_key(keys::LAST_RUN_AT));

        let finished = svc.orchestrator().wait(&job_id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_missing_selection_falls_back_to_latest_upload() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Supersede);
        let latest = svc
            .state()
            .add_document(NewDocument::new(3, "latest.mp4", "/v/latest.mp4"))
            .await
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.insert(keys::BRANCH.into(), json!("existing"));
        metadata.insert(keys::SELECTED_DOC_ID.into(), json!(999));

        let doc = svc.resolve_artifact(3, &metadata).await.unwrap().unwrap();
        assert_eq!(doc.id, latest);
    }

    #[tokio::test]
    async fn test_run_without_documents_starts_nothing() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Supersede);
        let id = svc.state().create_conversation(1, None).await.unwrap();
        let conv = ConversationRef::new(1, id);
        svc.set_state(conv, DialogState::UploadDocConfig).await.unwrap();

        let reply = say(&svc, conv, "run").await;
        assert!(reply.job_id.is_none());
        assert_eq!(reply.state, DialogState::UploadDocConfig);
        assert!(reply.reply.contains("No uploaded lecture video"));
        assert!(svc.orchestrator().registry().latest(conv).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_save_starts_no_job() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Supersede);
        svc.state()
            .add_document(NewDocument::new(1, "week1.mp4", "/v/week1.mp4"))
            .await
            .unwrap();
        let id = svc.state().create_conversation(1, None).await.unwrap();
        let conv = ConversationRef::new(1, id);
        svc.set_state(conv, DialogState::ExistingDocConfig).await.unwrap();

        // Reads keep working while every conversation update is refused
        let conn = rusqlite::Connection::open(temp.path().join("qp.db")).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER refuse_updates BEFORE UPDATE ON conversations
             BEGIN SELECT RAISE(ABORT, 'read only'); END;",
        )
        .unwrap();

        let err = svc.handle_message(conv, "run").await.unwrap_err();
        assert!(matches!(err, AssistantError::State(_)));
        assert!(svc.orchestrator().registry().latest(conv).await.is_none());
        let stored = svc.state().get_conversation(conv).await.unwrap().unwrap();
        assert_eq!(stored.current(), DialogState::ExistingDocConfig);
    }

    #[tokio::test]
    async fn test_reject_policy_keeps_config_state() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Reject);
        svc.state()
            .add_document(NewDocument::new(1, "week1.mp4", "/v/week1.mp4"))
            .await
            .unwrap();
        let id = svc.state().create_conversation(1, None).await.unwrap();
        let conv = ConversationRef::new(1, id);
        svc.set_state(conv, DialogState::ExistingDocConfig).await.unwrap();

        let first = say(&svc, conv, "run").await.job_id.unwrap();
        svc.set_state(conv, DialogState::ExistingDocConfig).await.unwrap();

        let refused = say(&svc, conv, "run").await;
        assert!(refused.job_id.is_none());
        assert_eq!(refused.state, DialogState::ExistingDocConfig);
        assert!(refused.reply.contains(first.as_str()));
        assert_eq!(svc.orchestrator().registry().latest(conv).await, Some(first.clone()));

        svc.orchestrator().wait(&first).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_state_requires_conversation() {
        let temp = tempdir().unwrap();
        let svc = service(&temp, OnActiveJob::Supersede);
        let err = svc
            .set_state(ConversationRef::new(1, 1), DialogState::QgDone)
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::State(StateError::NotFound(_))));
    }

    #[test]
    fn test_document_id_accepts_strings() {
        assert_eq!(document_id(&json!(4)), Some(4));
        assert_eq!(document_id(&json!(" 12 ")), Some(12));
        assert_eq!(document_id(&json!("abc")), None);
        assert_eq!(document_id(&json!(null)), None);
    }
}

//! Integration tests for quizpipe
//!
//! These tests drive the chat service and orchestrator end to end, with small
//! `sh` scripts standing in for the extraction and generation stages.

use std::path::Path;
use std::time::Duration;

use quizpipe::assistant::{ChatOutcome, ChatReply, ChatService};
use quizpipe::config::{OnActiveJob, StageConfig};
use quizpipe::dialog::DialogState;
use quizpipe::domain::{ConversationRef, JobId, JobStatus, NewDocument};
use quizpipe::jobs::{
    JobOrchestrator, JobRegistry, OrchestratorSettings, ProgressLedger, ProgressQuery, ProgressRecord, ProgressStage,
};
use quizpipe::state::StateManager;
use tempfile::TempDir;

fn sh(script: &str) -> StageConfig {
    StageConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "stage".to_string()],
        env: Default::default(),
    }
}

fn service(dir: &Path, extraction: &str, generation: &str) -> ChatService {
    let db_path = dir.join("quizpipe.db");
    let state = StateManager::spawn(&db_path).expect("Failed to spawn state manager");
    let settings = OrchestratorSettings {
        db_path,
        extraction: sh(extraction),
        generation: sh(generation),
        on_active_job: OnActiveJob::Supersede,
        stage_timeout: Some(Duration::from_secs(30)),
    };
    let orchestrator = JobOrchestrator::new(settings, ProgressLedger::new(dir.join("progress")), JobRegistry::new());
    ChatService::new(state, orchestrator, "general")
}

async fn say(svc: &ChatService, conv: ConversationRef, text: &str) -> ChatReply {
    match svc.handle_message(conv, text).await.expect("chat turn failed") {
        ChatOutcome::Reply(reply) => reply,
        ChatOutcome::Fallback => panic!("no rule matched {text:?}"),
    }
}

async fn new_conversation(svc: &ChatService, user: i64) -> ConversationRef {
    let id = svc.state().create_conversation(user, None).await.unwrap();
    ConversationRef::new(user, id)
}

async fn progress_of(svc: &ChatService, id: &JobId) -> ProgressRecord {
    svc.progress(&ProgressQuery::Job(id.to_string())).await
}

// =============================================================================
// End-to-end chat flow
// =============================================================================

#[tokio::test]
async fn test_upload_branch_runs_both_stages() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let args_log = temp.path().join("args.log");
    let extraction = format!(
        r#"echo "extraction $*" >> '{log}'
           echo "qg_config $QG_CONFIG" >> '{log}'
           while [ "$1" != "--progress" ]; do shift; done
           printf '{{"stage":"analysis","message":"OCR running"}}' > "$2""#,
        log = args_log.display()
    );
    let generation = format!(r#"echo "generation $*" >> '{}'"#, args_log.display());
    let svc = service(temp.path(), &extraction, &generation);

    let video = svc
        .state()
        .add_document(NewDocument::new(4, "lecture07.mp4", "/uploads/lecture07.mp4").with_course("chemistry"))
        .await
        .unwrap();
    let conv = new_conversation(&svc, 4).await;

    assert_eq!(say(&svc, conv, "upload").await.state, DialogState::UploadDocWait);
    assert_eq!(say(&svc, conv, "not yet").await.state, DialogState::UploadDocWait);
    assert_eq!(
        say(&svc, conv, &format!("uploaded: {video}")).await.state,
        DialogState::UploadDocConfig
    );
    say(&svc, conv, "set: questions=3 type=short").await;
    let run = say(&svc, conv, "実行").await;
    assert_eq!(run.state, DialogState::QgDone);

    let job_id = run.job_id.expect("run should start a job");
    let job = svc.orchestrator().wait(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(progress_of(&svc, &job_id).await, ProgressRecord::done());
    assert_eq!(
        svc.progress(&ProgressQuery::Conversation(conv)).await,
        ProgressRecord::done()
    );

    let log = std::fs::read_to_string(&args_log).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("extraction --db "));
    assert!(lines[0].contains("--user-id 4 --course chemistry --video-name lecture07.mp4"));
    assert!(lines[0].contains("--video-path /uploads/lecture07.mp4"));
    assert!(lines[1].contains(r#""questions":3"#));
    assert!(lines[1].contains(r#""type":"short""#));
    assert!(lines[2].starts_with("generation --db "));
    assert!(!lines[2].contains("--video-path"));

    // Back from the finished run lands on the upload branch's config step
    assert_eq!(say(&svc, conv, "back").await.state, DialogState::UploadDocConfig);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let conv = {
        let svc = service(temp.path(), "exit 0", "exit 0");
        let conv = new_conversation(&svc, 1).await;
        say(&svc, conv, "1-1").await;
        say(&svc, conv, "select: 12").await;
        svc.state().shutdown().await.unwrap();
        conv
    };

    let svc = service(temp.path(), "exit 0", "exit 0");
    let stored = svc.state().get_conversation(conv).await.unwrap().unwrap();
    assert_eq!(stored.current(), DialogState::ExistingDocConfig);
    assert_eq!(stored.metadata["selected_doc_id"], 12);
    assert_eq!(stored.metadata["branch"], "existing");
}

// =============================================================================
// Orchestrator properties
// =============================================================================

#[tokio::test]
async fn test_two_quick_starts_for_one_conversation() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    // Each run reports which one it is, keyed off its generation settings
    let extraction = r#"
        while [ "$1" != "--progress" ]; do shift; done
        case "$QG_CONFIG" in *'"questions":7'*) msg=first ;; *) msg=second ;; esac
        printf '{"stage":"analysis","message":"%s"}' "$msg" > "$2"
        sleep 1
    "#;
    let svc = service(temp.path(), extraction, "exit 0");
    svc.state()
        .add_document(NewDocument::new(2, "a.mp4", "/v/a.mp4"))
        .await
        .unwrap();
    let conv = new_conversation(&svc, 2).await;
    svc.set_state(conv, DialogState::ExistingDocConfig).await.unwrap();

    say(&svc, conv, "set: questions=7").await;
    let first = say(&svc, conv, "run").await.job_id.unwrap();
    svc.set_state(conv, DialogState::ExistingDocConfig).await.unwrap();
    say(&svc, conv, "set: questions=8").await;
    let second = say(&svc, conv, "run").await.job_id.unwrap();
    assert_ne!(first, second);

    assert_eq!(svc.orchestrator().registry().latest(conv).await, Some(second.clone()));

    // Both jobs are still inside extraction
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        svc.progress(&ProgressQuery::Conversation(conv)).await,
        ProgressRecord::new(ProgressStage::Extraction, "second")
    );
    assert_eq!(
        progress_of(&svc, &first).await,
        ProgressRecord::new(ProgressStage::Extraction, "first")
    );
    assert_eq!(progress_of(&svc, &second).await.message, "second");

    // The superseded job runs to completion and its record stays readable
    assert_eq!(svc.orchestrator().wait(&first).await.unwrap().status, JobStatus::Done);
    assert_eq!(svc.orchestrator().wait(&second).await.unwrap().status, JobStatus::Done);
    assert_eq!(progress_of(&svc, &first).await, ProgressRecord::done());
    assert!(temp.path().join("progress").join(format!("{first}.json")).exists());
}

#[tokio::test]
async fn test_stage_one_failure_skips_generation() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let marker = temp.path().join("generation-ran");
    let svc = service(
        temp.path(),
        "echo 'ffmpeg: invalid data found' >&2; exit 1",
        &format!("touch '{}'", marker.display()),
    );
    svc.state()
        .add_document(NewDocument::new(3, "broken.mp4", "/v/broken.mp4"))
        .await
        .unwrap();
    let conv = new_conversation(&svc, 3).await;
    svc.set_state(conv, DialogState::UploadDocConfig).await.unwrap();

    let job_id = say(&svc, conv, "run").await.job_id.unwrap();
    let job = svc.orchestrator().wait(&job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    let record = progress_of(&svc, &job_id).await;
    assert_eq!(record.stage, ProgressStage::Error);
    assert!(record.message.contains("ffmpeg: invalid data found"));
    assert!(!marker.exists(), "generation must not run after extraction fails");
}

#[tokio::test]
async fn test_unknown_job_reads_unknown() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let svc = service(temp.path(), "exit 0", "exit 0");

    for raw in ["", "0123", "../../etc/passwd", &JobId::generate().to_string()] {
        let record = svc.progress(&ProgressQuery::Job(raw.to_string())).await;
        assert_eq!(record, ProgressRecord::unknown(), "{raw:?}");
    }
    let record = svc
        .progress(&ProgressQuery::Conversation(ConversationRef::new(77, 1)))
        .await;
    assert_eq!(record.stage, ProgressStage::Unknown);
    assert_eq!(record.message, "");
}

#[tokio::test]
async fn test_jobs_for_different_conversations_are_independent() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let svc = service(temp.path(), "exit 0", "exit 0");
    svc.state()
        .add_document(NewDocument::new(5, "x.mp4", "/v/x.mp4"))
        .await
        .unwrap();

    let a = new_conversation(&svc, 5).await;
    let b = new_conversation(&svc, 5).await;
    for conv in [a, b] {
        svc.set_state(conv, DialogState::ExistingDocConfig).await.unwrap();
    }

    let job_a = say(&svc, a, "run").await.job_id.unwrap();
    let job_b = say(&svc, b, "start").await.job_id.unwrap();

    assert_eq!(svc.orchestrator().registry().latest(a).await, Some(job_a.clone()));
    assert_eq!(svc.orchestrator().registry().latest(b).await, Some(job_b.clone()));
    svc.orchestrator().wait(&job_a).await.unwrap();
    svc.orchestrator().wait(&job_b).await.unwrap();
}

//! quizpipe CLI entry point
//!
//! Operator and developer surface over the chat service and job orchestrator.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use quizpipe::assistant::{ChatOutcome, ChatService};
use quizpipe::cli::{Cli, Command, ConversationCommand, DocumentCommand, StateAction};
use quizpipe::config::Config;
use quizpipe::domain::{ConversationRef, JobId, NewDocument};
use quizpipe::jobs::{JobOrchestrator, JobRegistry, OrchestratorSettings, ProgressLedger, ProgressQuery};
use quizpipe::repl;
use quizpipe::state::StateManager;

/// How often `chat --follow` re-reads the progress record
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quizpipe")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("quizpipe.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        db = %config.storage.db_path,
        progress = %config.storage.progress_dir,
        "quizpipe loaded config"
    );

    let service = build_service(&config)?;

    match cli.command {
        Command::Conversation {
            command: ConversationCommand::New { user, title },
        } => {
            let id = service.state().create_conversation(user, title).await?;
            println!("{}", id);
            Ok(())
        }
        Command::Document {
            command: DocumentCommand::Add {
                user,
                name,
                path,
                course,
            },
        } => {
            let mut document = NewDocument::new(user, name, path);
            if let Some(course) = course {
                document = document.with_course(course);
            }
            let id = service.state().add_document(document).await?;
            println!("{}", id);
            Ok(())
        }
        Command::Chat {
            user,
            conversation,
            follow,
            text,
        } => cmd_chat(&service, ConversationRef::new(user, conversation), &text.join(" "), follow).await,
        Command::State { command } => cmd_state(&service, command).await,
        Command::Progress {
            job,
            user,
            conversation,
        } => {
            let query = match (job, user, conversation) {
                (Some(job), _, _) => ProgressQuery::Job(job),
                (None, Some(user), Some(conversation)) => {
                    ProgressQuery::Conversation(ConversationRef::new(user, conversation))
                }
                _ => return Err(eyre::eyre!("Specify --job, or --user together with --conversation")),
            };
            let record = service.progress(&query).await;
            println!("{}", serde_json::to_string(&record)?);
            Ok(())
        }
        Command::Repl { user, conversation } => repl::run_interactive(service, user, conversation).await,
    }
}

fn build_service(config: &Config) -> Result<ChatService> {
    let state = StateManager::spawn(config.storage.db_path()).context("Failed to open state store")?;
    let orchestrator = JobOrchestrator::new(
        OrchestratorSettings::from_config(config),
        ProgressLedger::new(config.storage.progress_dir()),
        JobRegistry::new(),
    );
    Ok(ChatService::new(state, orchestrator, config.dialog.default_course.clone()))
}

/// One dialog turn; stays until a started job finishes
async fn cmd_chat(service: &ChatService, conversation: ConversationRef, text: &str, follow: bool) -> Result<()> {
    let reply = match service.handle_message(conversation, text).await? {
        ChatOutcome::Reply(reply) => reply,
        ChatOutcome::Fallback => {
            println!("No command matched in the current step. Try `help`, `back` or `home`.");
            return Ok(());
        }
    };

    println!("{}", reply.reply);
    println!("[{}]", reply.state);

    if let Some(job_id) = reply.job_id {
        println!("job: {}", job_id);
        if follow {
            follow_job(service, &job_id).await;
        }
        if let Some(job) = service.orchestrator().wait(&job_id).await {
            println!("{}: {}", job.status, job.last_message);
        }
    }
    Ok(())
}

/// Print each distinct progress record until the job ends
///
/// The terminal check comes before the read, so the last record printed is
/// the one the job finished with.
async fn follow_job(service: &ChatService, job_id: &JobId) {
    let query = ProgressQuery::Job(job_id.to_string());
    let mut last = None;
    loop {
        let finished = service
            .orchestrator()
            .job(job_id)
            .await
            .is_none_or(|job| job.status.is_terminal());
        let record = service.progress(&query).await;
        if last.as_ref() != Some(&record) {
            println!("{:>10}  {}", record.stage, record.message);
        }
        if finished {
            break;
        }
        last = Some(record);
        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

async fn cmd_state(service: &ChatService, command: StateAction) -> Result<()> {
    match command {
        StateAction::Show { user, conversation } => {
            let conversation = ConversationRef::new(user, conversation);
            let state = service
                .state()
                .get_conversation(conversation)
                .await?
                .ok_or_else(|| eyre::eyre!("Conversation {} not found", conversation))?;
            let body = serde_json::json!({
                "state": state.current(),
                "metadata": state.metadata,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        StateAction::Set {
            user,
            conversation,
            state,
        } => {
            let updated = service.set_state(ConversationRef::new(user, conversation), state).await?;
            println!("{}", updated.current());
        }
    }
    Ok(())
}

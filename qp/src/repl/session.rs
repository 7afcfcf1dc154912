//! REPL session management

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::assistant::{ChatOutcome, ChatService};
use crate::domain::{ConversationRef, JobId};
use crate::jobs::{ProgressQuery, ProgressStage};

/// Interactive REPL session bound to one conversation
pub struct ReplSession {
    service: ChatService,
    conversation: ConversationRef,
    /// Jobs started from this session
    jobs: Vec<JobId>,
}

impl ReplSession {
    pub fn new(service: ChatService, conversation: ConversationRef) -> Self {
        Self {
            service,
            conversation,
            jobs: Vec::new(),
        }
    }

    /// Run the REPL main loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome().await?;

        // Create readline editor for proper line editing
        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }

                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input).await? {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    } else {
                        self.process_user_input(input).await?;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C - just show new prompt
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        self.wait_for_jobs().await;
        println!("Goodbye!");
        Ok(())
    }

    async fn print_welcome(&self) -> Result<()> {
        let state = self
            .service
            .state()
            .get_conversation(self.conversation)
            .await?
            .unwrap_or_default();

        println!();
        println!("{}", "quizpipe chat".bright_cyan().bold());
        println!("Conversation {} ({})", self.conversation, state.current());
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!();
        Ok(())
    }

    async fn handle_slash_command(&mut self, input: &str) -> Result<SlashResult> {
        let cmd = input.split_whitespace().next().unwrap_or("");

        match cmd {
            "/help" | "/h" => self.print_help(),
            "/quit" | "/q" | "/exit" => return Ok(SlashResult::Quit),
            "/state" | "/s" => {
                let state = self.service.state().get_conversation(self.conversation).await?;
                match state {
                    Some(state) => {
                        println!("{} {}", "State:".bright_cyan(), state.current());
                        println!("{}", serde_json::to_string_pretty(&state.metadata)?.dimmed());
                    }
                    None => println!("{}", "Conversation no longer exists.".red()),
                }
            }
            "/progress" | "/p" => {
                let record = self
                    .service
                    .progress(&ProgressQuery::Conversation(self.conversation))
                    .await;
                let stage = match record.stage {
                    ProgressStage::Done => record.stage.to_string().bright_green(),
                    ProgressStage::Error => record.stage.to_string().red(),
                    ProgressStage::Unknown => record.stage.to_string().dimmed(),
                    _ => record.stage.to_string().bright_yellow(),
                };
                println!("{} {}", stage, record.message);
            }
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
                println!("Type {} for available commands", "/help".yellow());
            }
        }
        Ok(SlashResult::Continue)
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:14} Show this help", "/help".yellow());
        println!("  {:14} Show dialog state and metadata", "/state".yellow());
        println!("  {:14} Show progress of the latest job", "/progress".yellow());
        println!("  {:14} Exit the REPL", "/quit".yellow());
        println!();
        println!("{}", "Dialog:".bright_cyan());
        println!("  {:14} Back to the main menu", "home".yellow());
        println!("  {:14} Previous step", "back".yellow());
        println!("  {:14} Guidance at the main menu", "help".yellow());
        println!();
    }

    async fn process_user_input(&mut self, input: &str) -> Result<()> {
        match self.service.handle_message(self.conversation, input).await? {
            ChatOutcome::Reply(reply) => {
                println!("{}", reply.reply);
                if let Some(job_id) = reply.job_id {
                    println!("{} {}", "Job:".bright_yellow(), job_id);
                    self.jobs.push(job_id);
                }
                println!("{}", format!("[{}]", reply.state).dimmed());
            }
            ChatOutcome::Fallback => {
                println!("{}", "Sorry, I didn't understand that here. Try `home` or `back`.".dimmed());
            }
        }
        println!();
        Ok(())
    }

    /// Jobs run inside this process; let them finish before exiting
    async fn wait_for_jobs(&self) {
        for job_id in &self.jobs {
            let running = self
                .service
                .orchestrator()
                .job(job_id)
                .await
                .is_some_and(|job| !job.status.is_terminal());
            if running {
                println!("{} {}", "Waiting for job".dimmed(), job_id);
                if let Some(job) = self.service.orchestrator().wait(job_id).await {
                    println!("{} {}", job.status, job.last_message);
                }
            }
        }
    }
}

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}

//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// quizpipe - lecture video to quiz pipeline
#[derive(Parser)]
#[command(
    name = "qp",
    about = "Chat-driven question generation from lecture videos",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/quizpipe/logs/quizpipe.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Manage conversations
    Conversation {
        #[command(subcommand)]
        command: ConversationCommand,
    },

    /// Manage uploaded lecture videos
    Document {
        #[command(subcommand)]
        command: DocumentCommand,
    },

    /// Send one chat message to a conversation
    ///
    /// A job started by the message runs inside this process, so the command
    /// returns once the job has finished.
    Chat {
        /// Owning user id
        #[arg(short, long)]
        user: i64,

        /// Conversation id
        #[arg(long)]
        conversation: i64,

        /// Print every progress change of a started job
        #[arg(short, long)]
        follow: bool,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Inspect or override dialog state
    State {
        #[command(subcommand)]
        command: StateAction,
    },

    /// Print the progress record of a job or conversation as JSON
    Progress {
        /// Job id
        #[arg(short, long, conflicts_with_all = ["user", "conversation"])]
        job: Option<String>,

        /// Owning user id (with --conversation)
        #[arg(short, long, requires = "conversation")]
        user: Option<i64>,

        /// Conversation id (with --user)
        #[arg(long, requires = "user")]
        conversation: Option<i64>,
    },

    /// Interactive chat session
    Repl {
        /// Owning user id
        #[arg(short, long)]
        user: i64,

        /// Conversation id (a new one is created if omitted)
        #[arg(long)]
        conversation: Option<i64>,
    },
}

/// Conversation subcommands
#[derive(Subcommand)]
pub enum ConversationCommand {
    /// Create a conversation and print its id
    New {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long)]
        title: Option<String>,
    },
}

/// Document subcommands
#[derive(Subcommand)]
pub enum DocumentCommand {
    /// Register an uploaded video and print its id
    Add {
        #[arg(short, long)]
        user: i64,

        /// File name passed to the stages as --video-name
        #[arg(short, long)]
        name: String,

        /// Storage path passed to extraction as --video-path
        #[arg(short, long)]
        path: String,

        /// Course label
        #[arg(long)]
        course: Option<String>,
    },
}

/// State subcommands
#[derive(Subcommand)]
pub enum StateAction {
    /// Show the conversation's state and metadata as JSON
    Show {
        #[arg(short, long)]
        user: i64,

        #[arg(long)]
        conversation: i64,
    },

    /// Force the conversation into a dialog state
    Set {
        #[arg(short, long)]
        user: i64,

        #[arg(long)]
        conversation: i64,

        /// One of ROOT_MENU, EXISTING_DOC_SELECT, EXISTING_DOC_CONFIG,
        /// UPLOAD_DOC_WAIT, UPLOAD_DOC_CONFIG, QG_DONE
        #[arg(short, long)]
        state: crate::dialog::DialogState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::DialogState;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_chat_joins_words() {
        let cli = Cli::parse_from(["qp", "chat", "-u", "1", "--conversation", "2", "select", "document:", "3"]);
        match cli.command {
            Command::Chat { user, conversation, text, follow } => {
                assert_eq!((user, conversation), (1, 2));
                assert_eq!(text.join(" "), "select document: 3");
                assert!(!follow);
            }
            _ => panic!("expected chat"),
        }
    }

    #[test]
    fn test_state_set_parses_state() {
        let cli = Cli::parse_from(["qp", "state", "set", "-u", "1", "--conversation", "2", "-s", "qg_done"]);
        match cli.command {
            Command::State {
                command: StateAction::Set { state, .. },
            } => assert_eq!(state, DialogState::QgDone),
            _ => panic!("expected state set"),
        }
    }

    #[test]
    fn test_progress_job_conflicts_with_conversation() {
        let result = Cli::try_parse_from(["qp", "progress", "--job", "abc", "-u", "1", "--conversation", "2"]);
        assert!(result.is_err());
        let result = Cli::try_parse_from(["qp", "progress", "-u", "1"]);
        assert!(result.is_err());
    }
}

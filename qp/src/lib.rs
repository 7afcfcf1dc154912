//! quizpipe - chat-driven question generation from lecture videos
//!
//! A conversation walks a user through picking (or uploading) a lecture video
//! and tuning the generation settings; on `run`, an external two-stage
//! pipeline (OCR/ASR extraction, then question generation) is launched and
//! its progress published for polling.
//!
//! # Modules
//!
//! - [`dialog`] - Finite-state dialog engine (pure)
//! - [`jobs`] - Stage orchestration, progress ledger and job registry
//! - [`state`] - SQLite-backed conversation state and document catalog
//! - [`assistant`] - Chat service tying the above together
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//! - [`repl`] - Interactive chat session

pub mod assistant;
pub mod cli;
pub mod config;
pub mod dialog;
pub mod domain;
pub mod jobs;
pub mod repl;
pub mod state;

pub use assistant::{AssistantError, ChatOutcome, ChatReply, ChatService};
pub use config::Config;
pub use dialog::{DialogState, Transition, transition};
pub use domain::{ConversationRef, JobId};
pub use jobs::{JobOrchestrator, ProgressQuery, ProgressRecord};
pub use state::StateManager;

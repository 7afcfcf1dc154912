//! Interactive chat REPL
//!
//! Drives one conversation through the dialog from a terminal, with slash
//! commands for inspecting state and job progress.

mod session;

pub use session::ReplSession;

use eyre::Result;

use crate::assistant::ChatService;
use crate::domain::ConversationRef;

/// Run the interactive REPL
///
/// This is the main entry point for `qp repl`. A new conversation is created
/// when `conversation_id` is not given.
pub async fn run_interactive(service: ChatService, user_id: i64, conversation_id: Option<i64>) -> Result<()> {
    let conversation_id = match conversation_id {
        Some(id) => id,
        None => service.state().create_conversation(user_id, Some("repl".to_string())).await?,
    };

    let conversation = ConversationRef::new(user_id, conversation_id);
    if service.state().get_conversation(conversation).await?.is_none() {
        return Err(eyre::eyre!("Conversation {} not found", conversation));
    }

    let mut session = ReplSession::new(service, conversation);
    session.run().await
}

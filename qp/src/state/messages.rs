//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::dialog::DialogState;
use crate::domain::{ConversationRef, ConversationState, Document, Metadata, NewDocument};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<rusqlite::Error> for StateError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::DeserializationError(e.to_string())
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Conversation operations
    CreateConversation {
        user_id: i64,
        title: Option<String>,
        reply: oneshot::Sender<StateResponse<i64>>,
    },
    GetConversation {
        conversation: ConversationRef,
        reply: oneshot::Sender<StateResponse<Option<ConversationState>>>,
    },
    SetConversation {
        conversation: ConversationRef,
        state: DialogState,
        patch: Metadata,
        reply: oneshot::Sender<StateResponse<ConversationState>>,
    },

    // Document catalog
    AddDocument {
        document: NewDocument,
        reply: oneshot::Sender<StateResponse<i64>>,
    },
    GetDocument {
        user_id: i64,
        id: i64,
        reply: oneshot::Sender<StateResponse<Option<Document>>>,
    },
    LatestDocument {
        user_id: i64,
        reply: oneshot::Sender<StateResponse<Option<Document>>>,
    },

    // Shutdown
    Shutdown,
}

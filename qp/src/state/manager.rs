//! StateManager - actor that owns the SQLite Store
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::dialog::DialogState;
use crate::domain::{ConversationRef, ConversationState, Document, Metadata, NewDocument};

use super::messages::{StateCommand, StateError, StateResponse};
use super::store::Store;

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor over the database at `db_path`
    pub fn spawn(db_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(db_path = %db_path.as_ref().display(), "spawn: called");
        let store = Store::open(db_path.as_ref())?;
        Ok(Self::with_store(store))
    }

    /// Spawn over a private in-memory database
    pub fn spawn_in_memory() -> eyre::Result<Self> {
        debug!("spawn_in_memory: called");
        Ok(Self::with_store(Store::open_in_memory()?))
    }

    fn with_store(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Conversation operations ===

    /// Create a conversation for `user_id`, returning its id
    pub async fn create_conversation(&self, user_id: i64, title: Option<String>) -> StateResponse<i64> {
        debug!(user_id, ?title, "create_conversation: called");
        self.request(|reply| StateCommand::CreateConversation { user_id, title, reply })
            .await
    }

    /// Load a conversation's state; `None` if the row does not exist
    pub async fn get_conversation(&self, conversation: ConversationRef) -> StateResponse<Option<ConversationState>> {
        debug!(%conversation, "get_conversation: called");
        self.request(|reply| StateCommand::GetConversation { conversation, reply })
            .await
    }

    /// Set the dialog state and shallow-merge `patch` into the metadata
    pub async fn set_conversation(
        &self,
        conversation: ConversationRef,
        state: DialogState,
        patch: Metadata,
    ) -> StateResponse<ConversationState> {
        debug!(%conversation, %state, "set_conversation: called");
        self.request(|reply| StateCommand::SetConversation {
            conversation,
            state,
            patch,
            reply,
        })
        .await
    }

    // === Document catalog ===

    pub async fn add_document(&self, document: NewDocument) -> StateResponse<i64> {
        debug!(user_id = document.user_id, name = %document.name, "add_document: called");
        self.request(|reply| StateCommand::AddDocument { document, reply })
            .await
    }

    pub async fn get_document(&self, user_id: i64, id: i64) -> StateResponse<Option<Document>> {
        debug!(user_id, id, "get_document: called");
        self.request(|reply| StateCommand::GetDocument { user_id, id, reply })
            .await
    }

    /// The user's most recent upload
    pub async fn latest_document(&self, user_id: i64) -> StateResponse<Option<Document>> {
        debug!(user_id, "latest_document: called");
        self.request(|reply| StateCommand::LatestDocument { user_id, reply })
            .await
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop that processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateConversation { user_id, title, reply } => {
                debug!(user_id, "actor_loop: CreateConversation command");
                let _ = reply.send(store.create_conversation(user_id, title.as_deref()));
            }

            StateCommand::GetConversation { conversation, reply } => {
                debug!(%conversation, "actor_loop: GetConversation command");
                let _ = reply.send(store.get_conversation(conversation));
            }

            StateCommand::SetConversation {
                conversation,
                state,
                patch,
                reply,
            } => {
                debug!(%conversation, %state, "actor_loop: SetConversation command");
                let _ = reply.send(store.set_conversation(conversation, state, &patch));
            }

            StateCommand::AddDocument { document, reply } => {
                debug!(user_id = document.user_id, "actor_loop: AddDocument command");
                let _ = reply.send(store.add_document(&document));
            }

            StateCommand::GetDocument { user_id, id, reply } => {
                debug!(user_id, id, "actor_loop: GetDocument command");
                let _ = reply.send(store.get_document(user_id, id));
            }

            StateCommand::LatestDocument { user_id, reply } => {
                debug!(user_id, "actor_loop: LatestDocument command");
                let _ = reply.send(store.latest_document(user_id));
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

//! Conversation and document records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dialog::DialogState;

/// Free-form conversation metadata (shallow-merged on every write)
pub type Metadata = Map<String, Value>;

/// Identifies one conversation of one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationRef {
    pub user_id: i64,
    pub conversation_id: i64,
}

impl ConversationRef {
    pub fn new(user_id: i64, conversation_id: i64) -> Self {
        Self {
            user_id,
            conversation_id,
        }
    }
}

impl std::fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.conversation_id)
    }
}

/// Persisted dialog position of a conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Current dialog state; `None` is treated as the root menu
    pub state: Option<DialogState>,

    /// Selected document, generation config, branch tag and friends
    pub metadata: Metadata,
}

impl ConversationState {
    /// The state the dialog engine should run against
    pub fn current(&self) -> DialogState {
        self.state.unwrap_or_default()
    }

    /// Metadata after a shallow merge of `patch` (patch keys win)
    pub fn merged_metadata(&self, patch: &Metadata) -> Metadata {
        let mut merged = self.metadata.clone();
        merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

/// An uploaded lecture video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub user_id: i64,

    /// File name handed to the stages as `--video-name`
    pub name: String,

    /// Storage location handed to the extraction stage as `--video-path`
    pub path: String,

    pub course_name: Option<String>,

    /// RFC 3339 upload time
    pub uploaded_at: String,
}

/// Fields needed to register an uploaded document
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: i64,
    pub name: String,
    pub path: String,
    pub course_name: Option<String>,
}

impl NewDocument {
    pub fn new(user_id: i64, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
            path: path.into(),
            course_name: None,
        }
    }

    pub fn with_course(mut self, course: impl Into<String>) -> Self {
        self.course_name = Some(course.into());
        self
    }
}

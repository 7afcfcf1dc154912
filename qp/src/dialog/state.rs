//! Dialog states and the navigation table

use serde::{Deserialize, Serialize};

use super::keys;
use crate::domain::Metadata;

/// Conversation position in the question-generation dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialogState {
    #[default]
    RootMenu,
    ExistingDocSelect,
    ExistingDocConfig,
    UploadDocWait,
    UploadDocConfig,
    QgDone,
}

impl DialogState {
    pub const ALL: [DialogState; 6] = [
        Self::RootMenu,
        Self::ExistingDocSelect,
        Self::ExistingDocConfig,
        Self::UploadDocWait,
        Self::UploadDocConfig,
        Self::QgDone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RootMenu => "ROOT_MENU",
            Self::ExistingDocSelect => "EXISTING_DOC_SELECT",
            Self::ExistingDocConfig => "EXISTING_DOC_CONFIG",
            Self::UploadDocWait => "UPLOAD_DOC_WAIT",
            Self::UploadDocConfig => "UPLOAD_DOC_CONFIG",
            Self::QgDone => "QG_DONE",
        }
    }

    /// Where "back" leads from this state
    ///
    /// Table-driven; only `QG_DONE` consults the branch recorded at the root
    /// menu.
    pub fn back_target(&self, metadata: &Metadata) -> DialogState {
        match self {
            Self::RootMenu => Self::RootMenu,
            Self::ExistingDocSelect => Self::RootMenu,
            Self::ExistingDocConfig => Self::ExistingDocSelect,
            Self::UploadDocWait => Self::RootMenu,
            Self::UploadDocConfig => Self::UploadDocWait,
            Self::QgDone => match Branch::from_metadata(metadata) {
                Some(Branch::Existing) => Self::ExistingDocConfig,
                _ => Self::UploadDocConfig,
            },
        }
    }
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DialogState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| format!("Unknown dialog state: {}", s))
    }
}

/// Which root-menu branch the conversation took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Existing,
    Upload,
}

impl Branch {
    /// Tag stored under `branch`
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Existing => "existing",
            Self::Upload => "upload",
        }
    }

    /// Root menu token stored under `last_menu_choice`
    pub fn menu_choice(&self) -> &'static str {
        match self {
            Self::Existing => "1-1",
            Self::Upload => "1-2",
        }
    }

    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        match metadata.get(keys::BRANCH).and_then(|v| v.as_str()) {
            Some("existing") => Some(Self::Existing),
            Some("upload") => Some(Self::Upload),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn branch(tag: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(keys::BRANCH.to_string(), json!(tag));
        metadata
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        for state in DialogState::ALL {
            assert_eq!(state.to_string().parse::<DialogState>().unwrap(), state);
        }
        assert_eq!("qg_done".parse::<DialogState>().unwrap(), DialogState::QgDone);
        assert!("NOT_A_STATE".parse::<DialogState>().is_err());
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&DialogState::ExistingDocSelect).unwrap();
        assert_eq!(json, "\"EXISTING_DOC_SELECT\"");
    }

    #[test]
    fn test_back_table() {
        let empty = Metadata::new();
        assert_eq!(DialogState::ExistingDocSelect.back_target(&empty), DialogState::RootMenu);
        assert_eq!(
            DialogState::ExistingDocConfig.back_target(&empty),
            DialogState::ExistingDocSelect
        );
        assert_eq!(DialogState::UploadDocWait.back_target(&empty), DialogState::RootMenu);
        assert_eq!(DialogState::UploadDocConfig.back_target(&empty), DialogState::UploadDocWait);
    }

    #[test]
    fn test_back_from_done_follows_branch() {
        assert_eq!(
            DialogState::QgDone.back_target(&branch("existing")),
            DialogState::ExistingDocConfig
        );
        assert_eq!(
            DialogState::QgDone.back_target(&branch("upload")),
            DialogState::UploadDocConfig
        );
        assert_eq!(
            DialogState::QgDone.back_target(&Metadata::new()),
            DialogState::UploadDocConfig
        );
    }
}

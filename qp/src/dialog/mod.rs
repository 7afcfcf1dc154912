//! Dialog engine
//!
//! A finite-state machine that interprets free-text chat commands against a
//! small per-state grammar. The engine is a pure function of
//! `(text, state, metadata)`: it reads no storage and performs no I/O, so the
//! same rules run against a persisted conversation or an in-memory harness.
//!
//! ```text
//! ROOT_MENU ──1-1──▶ EXISTING_DOC_SELECT ──select: N──▶ EXISTING_DOC_CONFIG ──run──┐
//!     │                                                                            ▼
//!     └────1-2──▶ UPLOAD_DOC_WAIT ──uploaded: N──▶ UPLOAD_DOC_CONFIG ──run──▶ QG_DONE
//! ```

mod engine;
mod grammar;
mod settings;
mod state;

pub use engine::{Action, Transition, transition, transition_at};
pub use settings::{
    GenerationConfig, current_config, default_config, describe_config, merge_config, parse_assignments,
};
pub use state::{Branch, DialogState};

/// Metadata keys written by the engine
pub mod keys {
    /// Branch tag recorded at the root menu (`existing` or `upload`)
    pub const BRANCH: &str = "branch";
    /// Raw menu token of the last root menu choice (`1-1` or `1-2`)
    pub const LAST_MENU_CHOICE: &str = "last_menu_choice";
    /// Document picked in the existing-document branch
    pub const SELECTED_DOC_ID: &str = "selected_doc_id";
    /// Document reported in the upload branch
    pub const UPLOADED_DOC_ID: &str = "uploaded_doc_id";
    /// Merged generation configuration object
    pub const QG_CONFIG: &str = "qg_config";
    /// Course label used for the job (set externally)
    pub const COURSE_NAME: &str = "course_name";
    /// RFC 3339 timestamp of the last `run`
    pub const LAST_RUN_AT: &str = "last_run_at";
}

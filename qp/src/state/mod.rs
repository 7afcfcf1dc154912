//! State management with actor pattern
//!
//! StateManager owns the SQLite store and processes messages via channels,
//! providing thread-safe access to conversation state and the document
//! catalog.

mod manager;
mod messages;
mod store;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
pub use store::Store;

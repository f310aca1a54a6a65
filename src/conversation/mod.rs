//! Conversation session manager.
//!
//! Components:
//! - `session`: session handle, turns and the append-only transcript
//! - `state`: turn lifecycle state machine
//! - `manager`: submit/poll/fetch cycle against the assistant API

pub mod manager;
pub mod session;
pub mod state;

pub use manager::{ConversationManager, FALLBACK_REPLY};
pub use session::{Role, Session, Transcript, Turn};
pub use state::{TurnState, TurnStateMachine};

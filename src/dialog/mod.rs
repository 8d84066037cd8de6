//! Conversation layer: explicit state, validation, listing order and the
//! per-turn state machine.

pub mod listing;
pub mod machine;
pub mod reply;
pub mod state;
pub mod validate;

pub use machine::DialogMachine;
pub use reply::Reply;
pub use state::{RegStep, RegistrationDraft, SessionState};

//! shiftbot: a conversational part-time-shift matching bot.
//!
//! Two halves, joined by the engine:
//!
//! - a dialog session layer that turns inbound chat events (free text and
//!   structured postbacks) into explicit per-user state machine turns, with
//!   strict per-user ordering and exactly one reply per event;
//! - a capacity-safe application service where accepting an application and
//!   decrementing a posting's remaining slots is a single atomic operation,
//!   so a posting can never be oversubscribed however many users race.
//!
//! Storage is PostgreSQL by default with an in-process memory backend for
//! development and tests. Addresses are resolved through the Google Maps
//! geocoding API so job listings can be ranked nearest-first per user.

pub mod bootstrap;
pub mod capacity;
pub mod channels;
pub mod config;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod geocode;
pub mod model;
pub mod store;

pub use capacity::{ApplicationService, ApplyOutcome};
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};

//! Store contracts and backends.
//!
//! Three concerns, one trait each, plus a [`Database`] supertrait implemented
//! by every backend: per-user conversation sessions, user/profile records and
//! the capacity-bearing job/application tables. The capacity operations
//! ([`CapacityStore::apply`] and [`CapacityStore::cancel_application`]) are
//! the only cross-user mutations and each backend implements them as a
//! single atomic unit.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capacity::ApplyOutcome;
use crate::dialog::SessionState;
use crate::error::StoreError;
use crate::model::{
    Application, ApplicationCounts, JobPosting, NewJobPosting, Profile, User,
};

/// One user's conversational progress between turns.
///
/// Keyed by platform user id, overwritten on every turn (last-write-wins),
/// swept by the pruning task once `last_activity` passes the idle timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub state: SessionState,
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>, state: SessionState) -> Self {
        Self {
            user_id: user_id.into(),
            state,
            last_activity: Utc::now(),
        }
    }

    /// Whether the session should be treated as expired at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let age = now.signed_duration_since(self.last_activity);
        age.to_std().map(|age| age > timeout).unwrap_or(false)
    }
}

/// Durable/cacheable per-user session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, user_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Overwrites any existing record for the same user.
    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Delete sessions idle longer than `older_than`; returns how many.
    async fn prune_stale_sessions(&self, older_than: Duration) -> Result<u64, StoreError>;
}

/// User records. Created on first inbound event, mutated only by completing
/// registration, deactivated rather than deleted.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Fetch the user, creating an unregistered record on first contact.
    async fn ensure_user(&self, user_id: &str) -> Result<User, StoreError>;

    /// Apply a completed registration in one write.
    async fn complete_registration(
        &self,
        user_id: &str,
        profile: &Profile,
    ) -> Result<User, StoreError>;

    /// Clears the active and registered flags; the user's next contact is
    /// handled as unregistered. Errors if the user does not exist.
    async fn deactivate_user(&self, user_id: &str) -> Result<(), StoreError>;
}

/// Job postings and applications; the sole source of truth for "is this job
/// still open".
#[async_trait]
pub trait CapacityStore: Send + Sync {
    async fn create_job(&self, new: NewJobPosting) -> Result<JobPosting, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError>;

    /// Open postings, unranked; callers order them per user.
    async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError>;

    async fn close_job(&self, id: Uuid) -> Result<(), StoreError>;

    /// Atomic test-and-decrement. Exactly one of the [`ApplyOutcome`]
    /// variants is returned; no interleaving of concurrent calls may drive
    /// remaining capacity below zero or admit the same user twice.
    async fn apply(&self, user_id: &str, job_id: Uuid) -> Result<ApplyOutcome, StoreError>;

    /// Idempotent: cancelling an already-cancelled application is a no-op
    /// returning the unchanged record. Restores one unit of capacity on the
    /// first call only.
    async fn cancel_application(&self, application_id: Uuid) -> Result<Application, StoreError>;

    /// The user's non-cancelled applications, newest first.
    async fn user_applications(&self, user_id: &str) -> Result<Vec<Application>, StoreError>;

    async fn find_application(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<Option<Application>, StoreError>;

    async fn application_counts(&self, job_id: Uuid) -> Result<ApplicationCounts, StoreError>;
}

/// Unified store surface; what the engine and the admin facade hold.
#[async_trait]
pub trait Database: SessionStore + UserStore + CapacityStore {
    async fn run_migrations(&self) -> Result<(), StoreError>;
}

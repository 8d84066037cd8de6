//! Application transaction service.
//!
//! The one component allowed to spend posting capacity. The atomicity itself
//! lives in the store backend ([`crate::store::CapacityStore::apply`]); this
//! layer bounds every call with a timeout, maps outcomes for the dialog
//! machine and exposes the small surface the administrative API consumes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::geocode::Geocoder;
use crate::model::{Application, ApplicationCounts, JobPosting, NewJobPosting};
use crate::store::Database;

/// Result of one apply transaction. Business outcomes, not errors: the
/// dialog machine maps each variant to a distinct user-facing reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Accepted(Application),
    AlreadyApplied,
    JobFull,
    JobClosed,
}

/// Capacity-safe application operations over a [`Database`] backend.
pub struct ApplicationService {
    store: Arc<dyn Database>,
    geocoder: Arc<dyn Geocoder>,
    timeout: Duration,
}

impl ApplicationService {
    pub fn new(store: Arc<dyn Database>, geocoder: Arc<dyn Geocoder>, timeout: Duration) -> Self {
        Self {
            store,
            geocoder,
            timeout,
        }
    }

    /// Bound a store call; an elapsed timer surfaces as
    /// [`StoreError::Timeout`], which callers treat as transient.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout {
                timeout: self.timeout,
            })?
    }

    /// Atomically test-and-decrement remaining capacity for `(user, job)`.
    pub async fn apply(&self, user_id: &str, job_id: Uuid) -> Result<ApplyOutcome, StoreError> {
        let outcome = self.bounded(self.store.apply(user_id, job_id)).await?;
        match &outcome {
            ApplyOutcome::Accepted(app) => {
                tracing::info!(user = user_id, job = %job_id, application = %app.id, "application accepted");
            }
            other => {
                tracing::debug!(user = user_id, job = %job_id, outcome = ?other, "apply declined");
            }
        }
        Ok(outcome)
    }

    /// Idempotently cancel an application, restoring one slot on the first
    /// call.
    pub async fn cancel_application(&self, application_id: Uuid) -> Result<Application, StoreError> {
        let app = self
            .bounded(self.store.cancel_application(application_id))
            .await?;
        tracing::info!(application = %application_id, job = %app.job_id, "application cancelled");
        Ok(app)
    }

    pub async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError> {
        self.bounded(self.store.list_open_jobs()).await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        self.bounded(self.store.get_job(id)).await
    }

    pub async fn user_applications(&self, user_id: &str) -> Result<Vec<Application>, StoreError> {
        self.bounded(self.store.user_applications(user_id)).await
    }

    pub async fn application_counts(&self, job_id: Uuid) -> Result<ApplicationCounts, StoreError> {
        self.bounded(self.store.application_counts(job_id)).await
    }

    /// Publish a posting, geocoding its address when coordinates were not
    /// supplied. A gateway failure leaves the posting without coordinates
    /// rather than failing creation; such postings rank last for everyone.
    pub async fn create_job(&self, mut new: NewJobPosting) -> Result<JobPosting, StoreError> {
        if new.coords.is_none() {
            match self.geocoder.resolve(&new.address).await {
                Ok(coords) => new.coords = coords,
                Err(e) => {
                    tracing::warn!(address = %new.address, error = %e, "posting address did not geocode");
                }
            }
        }
        self.bounded(self.store.create_job(new)).await
    }

    pub async fn close_job(&self, id: Uuid) -> Result<(), StoreError> {
        self.bounded(self.store.close_job(id)).await?;
        tracing::info!(job = %id, "posting closed");
        Ok(())
    }

    /// Administrative deactivation. The user record stays (applications keep
    /// their referent) but their next contact is handled as unregistered.
    pub async fn deactivate_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.bounded(self.store.deactivate_user(user_id)).await?;
        tracing::info!(user = user_id, "user deactivated");
        Ok(())
    }
}

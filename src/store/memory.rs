//! In-process memory backend.
//!
//! Backs tests and `DATABASE_BACKEND=memory` development runs. A single
//! mutex over all tables makes every operation, including apply, trivially
//! atomic; contention is irrelevant at dev scale.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::capacity::ApplyOutcome;
use crate::error::StoreError;
use crate::model::{
    Application, ApplicationCounts, ApplicationStatus, JobPosting, JobStatus, NewJobPosting,
    Profile, User,
};
use crate::store::{CapacityStore, Database, SessionRecord, SessionStore, UserStore};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    users: HashMap<String, User>,
    jobs: HashMap<Uuid, JobPosting>,
    applications: HashMap<Uuid, Application>,
}

/// Memory-backed [`Database`].
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryBackend {
    async fn load_session(&self, user_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.inner.lock().await.sessions.get(user_id).cloned())
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .sessions
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn prune_stale_sessions(&self, older_than: Duration) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| !s.is_stale(now, older_than));
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryBackend {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().await.users.get(user_id).cloned())
    }

    async fn ensure_user(&self, user_id: &str) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::unregistered(user_id));
        Ok(user.clone())
    }

    async fn complete_registration(
        &self,
        user_id: &str,
        profile: &Profile,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::unregistered(user_id));
        user.registered = true;
        user.active = true;
        user.display_name = Some(profile.display_name.clone());
        user.phone = Some(profile.phone.clone());
        user.address = Some(profile.address.clone());
        user.coords = Some(profile.coords);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn deactivate_user(&self, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.users.get_mut(user_id) {
            Some(user) => {
                user.active = false;
                user.registered = false;
                user.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "user".to_string(),
                id: user_id.to_string(),
            }),
        }
    }
}

#[async_trait]
impl CapacityStore for MemoryBackend {
    async fn create_job(&self, new: NewJobPosting) -> Result<JobPosting, StoreError> {
        let job = JobPosting {
            id: Uuid::new_v4(),
            title: new.title,
            address: new.address,
            coords: new.coords,
            total_capacity: new.capacity,
            remaining: new.capacity,
            status: JobStatus::Open,
            starts_at: new.starts_at,
            ends_at: new.ends_at,
            created_at: Utc::now(),
        };
        self.inner.lock().await.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError> {
        let now = Utc::now();
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Open && j.ends_at > now)
            .cloned()
            .collect())
    }

    async fn close_job(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::job_not_found(id))?;
        job.status = JobStatus::Closed;
        Ok(())
    }

    async fn apply(&self, user_id: &str, job_id: Uuid) -> Result<ApplyOutcome, StoreError> {
        // One lock for the whole check-and-decrement; the capacity safety
        // property rests on this being a single critical section.
        let mut inner = self.inner.lock().await;

        let Some(job) = inner.jobs.get(&job_id) else {
            return Err(StoreError::job_not_found(job_id));
        };
        if job.status == JobStatus::Closed {
            return Ok(ApplyOutcome::JobClosed);
        }

        let already = inner.applications.values().any(|a| {
            a.user_id == user_id && a.job_id == job_id && a.status != ApplicationStatus::Cancelled
        });
        if already {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        if job.remaining == 0 {
            return Ok(ApplyOutcome::JobFull);
        }

        let app = Application {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            job_id,
            status: ApplicationStatus::Accepted,
            created_at: Utc::now(),
        };
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.remaining -= 1;
        }
        inner.applications.insert(app.id, app.clone());
        Ok(ApplyOutcome::Accepted(app))
    }

    async fn cancel_application(&self, application_id: Uuid) -> Result<Application, StoreError> {
        let mut inner = self.inner.lock().await;

        let Some(app) = inner.applications.get(&application_id).cloned() else {
            return Err(StoreError::application_not_found(application_id));
        };
        if app.status == ApplicationStatus::Cancelled {
            return Ok(app);
        }

        let job_id = app.job_id;
        if let Some(stored) = inner.applications.get_mut(&application_id) {
            stored.status = ApplicationStatus::Cancelled;
        }
        if let Some(job) = inner.jobs.get_mut(&job_id) {
            job.remaining = (job.remaining + 1).min(job.total_capacity);
        }
        inner
            .applications
            .get(&application_id)
            .cloned()
            .ok_or_else(|| StoreError::application_not_found(application_id))
    }

    async fn user_applications(&self, user_id: &str) -> Result<Vec<Application>, StoreError> {
        let inner = self.inner.lock().await;
        let mut apps: Vec<Application> = inner
            .applications
            .values()
            .filter(|a| a.user_id == user_id && a.status != ApplicationStatus::Cancelled)
            .cloned()
            .collect();
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apps)
    }

    async fn find_application(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<Option<Application>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .applications
            .values()
            .find(|a| {
                a.user_id == user_id
                    && a.job_id == job_id
                    && a.status != ApplicationStatus::Cancelled
            })
            .cloned())
    }

    async fn application_counts(&self, job_id: Uuid) -> Result<ApplicationCounts, StoreError> {
        let inner = self.inner.lock().await;
        if !inner.jobs.contains_key(&job_id) {
            return Err(StoreError::job_not_found(job_id));
        }
        let mut counts = ApplicationCounts::default();
        for app in inner.applications.values().filter(|a| a.job_id == job_id) {
            match app.status {
                ApplicationStatus::Cancelled => counts.cancelled += 1,
                _ => counts.accepted += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl Database for MemoryBackend {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

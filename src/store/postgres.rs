//! PostgreSQL backend.
//!
//! All capacity bookkeeping happens inside a single transaction with a row
//! lock on the posting, so concurrent applies serialize on the job row and
//! remaining capacity can never go negative. Session state is stored as
//! tagged JSONB.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config as PoolConfig, Pool, Runtime};
use secrecy::ExposeSecret;
use tokio_postgres::types::Json;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::capacity::ApplyOutcome;
use crate::config::DatabaseConfig;
use crate::dialog::SessionState;
use crate::error::StoreError;
use crate::model::{
    Application, ApplicationCounts, ApplicationStatus, Coordinates, JobPosting, JobStatus,
    NewJobPosting, Profile, User,
};
use crate::store::{CapacityStore, Database, SessionRecord, SessionStore, UserStore};

pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Connect and verify the pool with one checkout.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut cfg = PoolConfig::new();
        cfg.url = Some(config.url.expose_secret().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, StoreError> {
        Ok(self.pool.get().await?)
    }
}

fn coords_from(lat: Option<f64>, lng: Option<f64>) -> Option<Coordinates> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
        _ => None,
    }
}

fn user_from_row(row: &Row) -> Result<User, StoreError> {
    Ok(User {
        id: row.get("id"),
        registered: row.get("registered"),
        active: row.get("active"),
        display_name: row.get("display_name"),
        phone: row.get("phone"),
        address: row.get("address"),
        coords: coords_from(row.get("lat"), row.get("lng")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn job_from_row(row: &Row) -> Result<JobPosting, StoreError> {
    let status: String = row.get("status");
    let total_capacity: i32 = row.get("total_capacity");
    let remaining: i32 = row.get("remaining");
    Ok(JobPosting {
        id: row.get("id"),
        title: row.get("title"),
        address: row.get("address"),
        coords: coords_from(row.get("lat"), row.get("lng")),
        total_capacity: total_capacity.max(0) as u32,
        remaining: remaining.max(0) as u32,
        status: status
            .parse::<JobStatus>()
            .map_err(StoreError::Serialization)?,
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        created_at: row.get("created_at"),
    })
}

fn application_from_row(row: &Row) -> Result<Application, StoreError> {
    let status: String = row.get("status");
    Ok(Application {
        id: row.get("id"),
        user_id: row.get("user_id"),
        job_id: row.get("job_id"),
        status: status
            .parse::<ApplicationStatus>()
            .map_err(StoreError::Serialization)?,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        use refinery::embed_migrations;
        embed_migrations!("migrations");

        let mut client = self.pool.get().await?;
        migrations::runner()
            .run_async(&mut **client)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgBackend {
    async fn load_session(&self, user_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id, state, last_activity FROM sessions WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        row.map(|row| {
            let Json(state): Json<SessionState> = row.get("state");
            Ok(SessionRecord {
                user_id: row.get("user_id"),
                state,
                last_activity: row.get("last_activity"),
            })
        })
        .transpose()
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO sessions (user_id, state, last_activity) VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE SET state = $2, last_activity = $3",
            &[
                &record.user_id,
                &Json(&record.state),
                &record.last_activity,
            ],
        )
        .await?;
        Ok(())
    }

    async fn prune_stale_sessions(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .map_err(|e| StoreError::Query(e.to_string()))?;
        let conn = self.conn().await?;
        let pruned = conn
            .execute("DELETE FROM sessions WHERE last_activity < $1", &[&cutoff])
            .await?;
        Ok(pruned)
    }
}

#[async_trait]
impl UserStore for PgBackend {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM users WHERE id = $1", &[&user_id])
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn ensure_user(&self, user_id: &str) -> Result<User, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO users (id) VALUES ($1)
                 ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id
                 RETURNING *",
                &[&user_id],
            )
            .await?;
        user_from_row(&row)
    }

    async fn complete_registration(
        &self,
        user_id: &str,
        profile: &Profile,
    ) -> Result<User, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "UPDATE users
                 SET registered = TRUE,
                     display_name = $2,
                     phone = $3,
                     address = $4,
                     lat = $5,
                     lng = $6,
                     updated_at = NOW()
                 WHERE id = $1
                 RETURNING *",
                &[
                    &user_id,
                    &profile.display_name,
                    &profile.phone,
                    &profile.address,
                    &profile.coords.lat,
                    &profile.coords.lng,
                ],
            )
            .await?;
        let row = row.ok_or_else(|| StoreError::NotFound {
            entity: "user".to_string(),
            id: user_id.to_string(),
        })?;
        user_from_row(&row)
    }

    async fn deactivate_user(&self, user_id: &str) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE users SET active = FALSE, registered = FALSE, updated_at = NOW()
                 WHERE id = $1",
                &[&user_id],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "user".to_string(),
                id: user_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CapacityStore for PgBackend {
    async fn create_job(&self, new: NewJobPosting) -> Result<JobPosting, StoreError> {
        let conn = self.conn().await?;
        let id = Uuid::new_v4();
        let capacity = i32::try_from(new.capacity)
            .map_err(|_| StoreError::Constraint("capacity out of range".to_string()))?;
        let row = conn
            .query_one(
                "INSERT INTO jobs
                     (id, title, address, lat, lng, total_capacity, remaining, status, starts_at, ends_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $6, 'open', $7, $8)
                 RETURNING *",
                &[
                    &id,
                    &new.title,
                    &new.address,
                    &new.coords.map(|c| c.lat),
                    &new.coords.map(|c| c.lng),
                    &capacity,
                    &new.starts_at,
                    &new.ends_at,
                ],
            )
            .await?;
        job_from_row(&row)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM jobs WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT * FROM jobs WHERE status = 'open' AND ends_at > NOW()",
                &[],
            )
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn close_job(&self, id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute("UPDATE jobs SET status = 'closed' WHERE id = $1", &[&id])
            .await?;
        if updated == 0 {
            return Err(StoreError::job_not_found(id));
        }
        Ok(())
    }

    async fn apply(&self, user_id: &str, job_id: Uuid) -> Result<ApplyOutcome, StoreError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        // Lock the posting row; every concurrent apply for this job queues
        // here. Dropping the transaction on the early outcomes rolls back.
        let row = tx
            .query_opt(
                "SELECT status, remaining FROM jobs WHERE id = $1 FOR UPDATE",
                &[&job_id],
            )
            .await?;
        let Some(row) = row else {
            return Err(StoreError::job_not_found(job_id));
        };

        let status: String = row.get("status");
        if status.parse::<JobStatus>().map_err(StoreError::Serialization)? != JobStatus::Open {
            return Ok(ApplyOutcome::JobClosed);
        }

        let existing = tx
            .query_opt(
                "SELECT id FROM applications
                 WHERE user_id = $1 AND job_id = $2 AND status <> 'cancelled'",
                &[&user_id, &job_id],
            )
            .await?;
        if existing.is_some() {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let remaining: i32 = row.get("remaining");
        if remaining <= 0 {
            return Ok(ApplyOutcome::JobFull);
        }

        tx.execute(
            "UPDATE jobs SET remaining = remaining - 1 WHERE id = $1",
            &[&job_id],
        )
        .await?;
        let id = Uuid::new_v4();
        let row = tx
            .query_one(
                "INSERT INTO applications (id, user_id, job_id, status)
                 VALUES ($1, $2, $3, 'accepted')
                 RETURNING *",
                &[&id, &user_id, &job_id],
            )
            .await?;
        let application = application_from_row(&row)?;
        tx.commit().await?;

        Ok(ApplyOutcome::Accepted(application))
    }

    async fn cancel_application(&self, application_id: Uuid) -> Result<Application, StoreError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        let row = tx
            .query_opt(
                "SELECT * FROM applications WHERE id = $1 FOR UPDATE",
                &[&application_id],
            )
            .await?;
        let Some(row) = row else {
            return Err(StoreError::application_not_found(application_id));
        };
        let application = application_from_row(&row)?;
        if application.status == ApplicationStatus::Cancelled {
            return Ok(application);
        }

        let row = tx
            .query_one(
                "UPDATE applications SET status = 'cancelled' WHERE id = $1 RETURNING *",
                &[&application_id],
            )
            .await?;
        // Restore the slot, clamped to the original capacity.
        tx.execute(
            "UPDATE jobs SET remaining = LEAST(remaining + 1, total_capacity) WHERE id = $1",
            &[&application.job_id],
        )
        .await?;
        let application = application_from_row(&row)?;
        tx.commit().await?;

        Ok(application)
    }

    async fn user_applications(&self, user_id: &str) -> Result<Vec<Application>, StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT * FROM applications
                 WHERE user_id = $1 AND status <> 'cancelled'
                 ORDER BY created_at DESC",
                &[&user_id],
            )
            .await?;
        rows.iter().map(application_from_row).collect()
    }

    async fn find_application(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<Option<Application>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT * FROM applications
                 WHERE user_id = $1 AND job_id = $2 AND status <> 'cancelled'",
                &[&user_id, &job_id],
            )
            .await?;
        row.as_ref().map(application_from_row).transpose()
    }

    async fn application_counts(&self, job_id: Uuid) -> Result<ApplicationCounts, StoreError> {
        let conn = self.conn().await?;
        // Anchored on jobs so an unknown posting errors instead of tallying
        // an empty set.
        let row = conn
            .query_opt(
                "SELECT
                     COUNT(a.id) FILTER (WHERE a.status <> 'cancelled') AS accepted,
                     COUNT(a.id) FILTER (WHERE a.status = 'cancelled') AS cancelled
                 FROM jobs j
                 LEFT JOIN applications a ON a.job_id = j.id
                 WHERE j.id = $1
                 GROUP BY j.id",
                &[&job_id],
            )
            .await?
            .ok_or_else(|| StoreError::job_not_found(job_id))?;
        let accepted: i64 = row.get("accepted");
        let cancelled: i64 = row.get("cancelled");
        Ok(ApplicationCounts {
            accepted: accepted.max(0) as u64,
            cancelled: cancelled.max(0) as u64,
        })
    }
}

impl std::fmt::Debug for PgBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgBackend").finish_non_exhaustive()
    }
}

//! Domain types shared by the dialog engine and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// WGS84 coordinates resolved from a free-text address.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to `other` in meters (haversine).
    pub fn distance_m(&self, other: &Coordinates) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// A job seeker, created on first inbound event.
///
/// Never deleted; cancelling a registration flips `active` off so opaque
/// platform ids keep a stable row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Platform-issued stable identifier (LINE user id).
    pub id: String,
    pub registered: bool,
    pub active: bool,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub coords: Option<Coordinates>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Fresh unregistered record for a first-seen platform id.
    pub fn unregistered(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            registered: false,
            active: true,
            display_name: None,
            phone: None,
            address: None,
            coords: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Completed registration payload, applied to a [`User`] in one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub phone: String,
    pub address: String,
    pub coords: Coordinates,
}

/// Posting lifecycle. Closing is an administrative act, distinct from the
/// posting merely filling up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    Closed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("invalid job status '{s}'")),
        }
    }
}

/// A part-time job posting with finite capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: Uuid,
    pub title: String,
    pub address: String,
    pub coords: Option<Coordinates>,
    /// Fixed at creation.
    pub total_capacity: u32,
    /// Monotonically non-increasing except on explicit cancellation.
    pub remaining: u32,
    pub status: JobStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl JobPosting {
    pub fn is_open(&self) -> bool {
        self.status == JobStatus::Open
    }
}

/// Fields supplied by the administrative surface when publishing a posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobPosting {
    pub title: String,
    pub address: String,
    /// Geocoded at creation when absent.
    pub coords: Option<Coordinates>,
    pub capacity: u32,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Cancelled,
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid application status '{s}'")),
        }
    }
}

/// A user's commitment against one posting.
///
/// Invariant: at most one non-cancelled application per (user, job) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub user_id: String,
    pub job_id: Uuid,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

/// Per-posting application tallies exposed to the administrative surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationCounts {
    pub accepted: u64,
    pub cancelled: u64,
}

//! Explicit conversation state.
//!
//! One variant per dialog position, serialized as tagged JSON into the
//! session store. There is no terminal state; every flow re-enters `Idle`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which registration field the next free-text message is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegStep {
    Name,
    Phone,
    Address,
}

impl RegStep {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Name => Some(Self::Phone),
            Self::Phone => Some(Self::Address),
            Self::Address => None,
        }
    }
}

/// Fields collected so far during registration. The address is validated and
/// geocoded in the same turn it arrives, so it never sits in the draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

/// Per-user dialog position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Registering {
        step: RegStep,
        #[serde(default)]
        draft: RegistrationDraft,
    },
    BrowsingJobs {
        page: usize,
    },
    ViewingJob {
        job_id: Uuid,
    },
    ConfirmApply {
        job_id: Uuid,
    },
    ViewingApplications,
    ViewingProfile,
}

impl SessionState {
    /// Entry point into the registration flow.
    pub fn start_registration() -> Self {
        Self::Registering {
            step: RegStep::Name,
            draft: RegistrationDraft::default(),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

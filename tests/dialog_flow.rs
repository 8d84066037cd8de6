//! End-to-end dialog turns against the memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;

use shiftbot::capacity::ApplicationService;
use shiftbot::channels::{ChannelManager, InboundEvent};
use shiftbot::config::DialogConfig;
use shiftbot::dialog::{DialogMachine, SessionState};
use shiftbot::engine::Engine;
use shiftbot::error::GeocodeError;
use shiftbot::geocode::Geocoder;
use shiftbot::model::{Coordinates, NewJobPosting};
use shiftbot::store::memory::MemoryBackend;
use shiftbot::store::{Database, SessionRecord, SessionStore, UserStore};

struct FixedGeocoder(Option<Coordinates>);

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn resolve(&self, _address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        Ok(self.0)
    }
}

struct Harness {
    engine: Engine,
    store: Arc<dyn Database>,
    service: Arc<ApplicationService>,
}

fn harness() -> Harness {
    harness_with_geocoder(Some(Coordinates::new(25.0478, 121.5170)))
}

fn harness_with_geocoder(resolved: Option<Coordinates>) -> Harness {
    let config = DialogConfig::default();
    let store: Arc<dyn Database> = Arc::new(MemoryBackend::new());
    let geocoder: Arc<dyn Geocoder> = Arc::new(FixedGeocoder(resolved));
    let service = Arc::new(ApplicationService::new(
        Arc::clone(&store),
        Arc::clone(&geocoder),
        config.store_timeout,
    ));
    let machine = Arc::new(DialogMachine::new(
        Arc::clone(&store),
        Arc::clone(&service),
        geocoder,
        config.clone(),
    ));
    let channels = Arc::new(ChannelManager::new(Vec::new()));
    Harness {
        engine: Engine::new(Arc::clone(&store), machine, channels, config),
        store,
        service,
    }
}

impl Harness {
    async fn message(&self, user: &str, text: &str) -> &'static str {
        let event = InboundEvent::message("test", user, text);
        self.engine.turn(&event).await.unwrap().kind()
    }

    async fn postback(&self, user: &str, payload: &str) -> &'static str {
        let event = InboundEvent::postback("test", user, payload);
        self.engine.turn(&event).await.unwrap().kind()
    }

    async fn open_job(&self, title: &str, capacity: u32) -> uuid::Uuid {
        let now = Utc::now();
        let job = self
            .service
            .create_job(NewJobPosting {
                title: title.to_string(),
                address: "100 Somewhere Rd".to_string(),
                coords: Some(Coordinates::new(25.0340, 121.5645)),
                capacity,
                starts_at: now + chrono::Duration::hours(24),
                ends_at: now + chrono::Duration::hours(32),
            })
            .await
            .unwrap();
        job.id
    }

    async fn register(&self, user: &str) {
        assert_eq!(
            self.postback(user, "action=register&step=register").await,
            "prompt_name"
        );
        assert_eq!(self.message(user, "Alice").await, "prompt_phone");
        assert_eq!(self.message(user, "0912345678").await, "prompt_address");
        assert_eq!(
            self.message(user, "1 Example Street").await,
            "registration_complete"
        );
    }
}

#[tokio::test]
async fn registration_flow_collects_name_phone_address() {
    let h = harness();

    assert_eq!(
        h.postback("U1", "action=register&step=register").await,
        "prompt_name"
    );
    assert_eq!(h.message("U1", "   ").await, "invalid_name");
    assert_eq!(h.message("U1", "Alice").await, "prompt_phone");
    assert_eq!(h.message("U1", "12345").await, "invalid_phone");
    assert_eq!(h.message("U1", "0912-345-678").await, "prompt_address");
    assert_eq!(
        h.message("U1", "1 Example Street").await,
        "registration_complete"
    );

    let user = h.store.get_user("U1").await.unwrap().unwrap();
    assert!(user.registered);
    assert_eq!(user.display_name.as_deref(), Some("Alice"));
    assert_eq!(user.phone.as_deref(), Some("0912345678"));
    assert!(user.coords.is_some());
}

#[tokio::test]
async fn unresolvable_address_keeps_user_on_address_step() {
    let h = harness_with_geocoder(None);

    h.postback("U1", "action=register&step=register").await;
    h.message("U1", "Alice").await;
    h.message("U1", "0912345678").await;
    assert_eq!(h.message("U1", "nowhere at all").await, "unresolvable_address");
    // Still on the address step, not bounced out of the flow.
    assert_eq!(h.message("U1", "still nowhere").await, "unresolvable_address");

    let user = h.store.get_user("U1").await.unwrap().unwrap();
    assert!(!user.registered);
}

#[tokio::test]
async fn cancel_aborts_registration() {
    let h = harness();
    h.postback("U1", "action=register&step=register").await;
    h.message("U1", "Alice").await;
    assert_eq!(h.message("U1", "cancel").await, "registration_cancelled");

    // Free text afterwards is an idle turn, not a registration answer.
    assert_eq!(h.message("U1", "hello").await, "main_menu");
}

#[tokio::test]
async fn stale_session_is_treated_as_fresh() {
    let h = harness();
    h.postback("U1", "action=register&step=register").await;

    // Backdate the session past the idle timeout.
    let record = h.store.load_session("U1").await.unwrap().unwrap();
    let backdated = SessionRecord {
        last_activity: Utc::now() - chrono::Duration::hours(25),
        ..record
    };
    h.store.save_session(&backdated).await.unwrap();

    // The next message must not be consumed as the registration name.
    assert_eq!(h.message("U1", "Alice").await, "main_menu");
    let user = h.store.get_user("U1").await.unwrap().unwrap();
    assert!(!user.registered);
}

#[tokio::test]
async fn unknown_postback_yields_help_and_keeps_state() {
    let h = harness();
    h.postback("U1", "action=register&step=register").await;
    assert_eq!(h.postback("U1", "action=bogus&step=nope").await, "help");

    // Registration is still in progress.
    assert_eq!(h.message("U1", "Alice").await, "prompt_phone");
}

#[tokio::test]
async fn apply_requires_registration() {
    let h = harness();
    let job = h.open_job("Warehouse shift", 2).await;

    let kind = h
        .postback("U1", &format!("action=job&step=apply&job_id={job}"))
        .await;
    assert_eq!(kind, "registration_required");
    assert_eq!(h.message("U1", "Alice").await, "prompt_phone");
}

#[tokio::test]
async fn browse_view_confirm_apply() {
    let h = harness();
    let job = h.open_job("Cafe counter", 2).await;
    h.register("U1").await;

    assert_eq!(h.postback("U1", "action=job&step=list").await, "job_list");
    assert_eq!(
        h.postback("U1", &format!("action=job&step=view&job_id={job}"))
            .await,
        "job_detail"
    );
    assert_eq!(
        h.postback("U1", &format!("action=job&step=apply&job_id={job}"))
            .await,
        "confirm_apply"
    );
    assert_eq!(h.message("U1", "maybe").await, "confirm_reminder");
    assert_eq!(h.message("U1", "yes").await, "applied");

    let apps = h.service.user_applications("U1").await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].job_id, job);
}

#[tokio::test]
async fn duplicate_apply_postback_does_not_double_apply() {
    let h = harness();
    let job = h.open_job("Night stocking", 5).await;
    h.register("U1").await;

    let payload = format!("action=job&step=apply&job_id={job}");
    assert_eq!(h.postback("U1", &payload).await, "confirm_apply");
    // Redelivery of the same postback while already confirming.
    assert_eq!(h.postback("U1", &payload).await, "confirm_reminder");
    assert_eq!(h.message("U1", "yes").await, "applied");

    // Applying again from scratch is refused before any confirmation.
    assert_eq!(h.postback("U1", &payload).await, "already_applied");
    assert_eq!(h.service.user_applications("U1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn negative_confirmation_returns_to_job_view() {
    let h = harness();
    let job = h.open_job("Flyer handout", 1).await;
    h.register("U1").await;

    h.postback("U1", &format!("action=job&step=apply&job_id={job}"))
        .await;
    assert_eq!(h.message("U1", "no").await, "apply_aborted");

    let record = h.store.load_session("U1").await.unwrap().unwrap();
    assert_eq!(record.state, SessionState::ViewingJob { job_id: job });
    assert!(h.service.user_applications("U1").await.unwrap().is_empty());
}

#[tokio::test]
async fn listing_pages_wrap_on_repeated_list_action() {
    let h = harness();
    for i in 0..7 {
        h.open_job(&format!("Job {i}"), 1).await;
    }
    h.register("U1").await;

    h.postback("U1", "action=job&step=list").await;
    let first = h.store.load_session("U1").await.unwrap().unwrap().state;
    assert_eq!(first, SessionState::BrowsingJobs { page: 0 });

    h.postback("U1", "action=job&step=list").await;
    let second = h.store.load_session("U1").await.unwrap().unwrap().state;
    assert_eq!(second, SessionState::BrowsingJobs { page: 1 });

    h.postback("U1", "action=job&step=list").await;
    let third = h.store.load_session("U1").await.unwrap().unwrap().state;
    assert_eq!(third, SessionState::BrowsingJobs { page: 0 });
}

#[tokio::test]
async fn profile_and_applications_views() {
    let h = harness();
    let job = h.open_job("Sampling booth", 3).await;

    assert_eq!(
        h.postback("U1", "action=view_profile&step=view").await,
        "registration_required"
    );
    h.message("U1", "cancel").await;
    h.register("U1").await;

    assert_eq!(
        h.postback("U1", "action=view_profile&step=view").await,
        "profile"
    );
    assert_eq!(
        h.postback("U1", "action=job&step=my_applications").await,
        "no_applications"
    );

    h.postback("U1", &format!("action=job&step=apply&job_id={job}"))
        .await;
    h.message("U1", "yes").await;
    assert_eq!(
        h.postback("U1", "action=job&step=my_applications").await,
        "applications_list"
    );
}

#[tokio::test]
async fn replaying_events_yields_identical_reply_kinds() {
    // Same ordered event sequence from a fresh session, twice, against
    // independent backends: the reply-kind sequences must match.
    let run = |h: Harness| async move {
        let mut kinds = Vec::new();
        kinds.push(h.postback("U1", "action=register&step=register").await);
        kinds.push(h.message("U1", "Alice").await);
        kinds.push(h.message("U1", "not-a-phone").await);
        kinds.push(h.message("U1", "0912345678").await);
        kinds.push(h.message("U1", "1 Example Street").await);
        kinds.push(h.postback("U1", "action=view_profile&step=view").await);
        kinds.push(h.message("U1", "hello").await);
        kinds
    };

    let first = run(harness()).await;
    let second = run(harness()).await;
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec![
            "prompt_name",
            "prompt_phone",
            "invalid_phone",
            "prompt_address",
            "registration_complete",
            "profile",
            "main_menu",
        ]
    );
}

#[tokio::test]
async fn repeated_confirmation_creates_one_application() {
    let h = harness();
    let job = h.open_job("Inventory count", 3).await;
    h.register("U1").await;

    h.postback("U1", &format!("action=job&step=apply&job_id={job}"))
        .await;
    assert_eq!(h.message("U1", "yes").await, "applied");
    // A redelivered confirmation lands on an idle session.
    assert_eq!(h.message("U1", "yes").await, "main_menu");

    assert_eq!(h.service.user_applications("U1").await.unwrap().len(), 1);
    let counts = h.service.application_counts(job).await.unwrap();
    assert_eq!(counts.accepted, 1);
}

#[tokio::test]
async fn one_slot_two_confirmed_users_yields_one_acceptance() {
    let h = harness();
    let job = h.open_job("Single slot", 1).await;
    h.register("U1").await;
    h.register("U2").await;

    // Both users pass the confirmation prompt before either commits.
    let payload = format!("action=job&step=apply&job_id={job}");
    assert_eq!(h.postback("U1", &payload).await, "confirm_apply");
    assert_eq!(h.postback("U2", &payload).await, "confirm_apply");

    assert_eq!(h.message("U1", "yes").await, "applied");
    assert_eq!(h.message("U2", "yes").await, "job_full");

    let counts = h.service.application_counts(job).await.unwrap();
    assert_eq!(counts.accepted, 1);
    assert_eq!(counts.cancelled, 0);
}

#[tokio::test]
async fn deactivated_user_must_register_again() {
    let h = harness();
    h.register("U1").await;
    assert_eq!(
        h.postback("U1", "action=view_profile&step=view").await,
        "profile"
    );

    h.service.deactivate_user("U1").await.unwrap();
    assert!(h.service.deactivate_user("nobody").await.is_err());

    // The record survives deactivation but the user is back to square one.
    let user = h.store.get_user("U1").await.unwrap().unwrap();
    assert!(!user.active);
    assert_eq!(
        h.postback("U1", "action=view_profile&step=view").await,
        "registration_required"
    );
}

#[tokio::test]
async fn apply_to_missing_job_reports_not_found() {
    let h = harness();
    h.register("U1").await;

    let kind = h
        .postback(
            "U1",
            &format!("action=job&step=apply&job_id={}", uuid::Uuid::new_v4()),
        )
        .await;
    assert_eq!(kind, "job_not_found");
}

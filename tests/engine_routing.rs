//! Engine routing and backend-failure behavior against stub channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use uuid::Uuid;

use shiftbot::capacity::{ApplicationService, ApplyOutcome};
use shiftbot::channels::{Channel, ChannelManager, InboundEvent, OutgoingReply};
use shiftbot::config::DialogConfig;
use shiftbot::dialog::{DialogMachine, Reply};
use shiftbot::engine::Engine;
use shiftbot::error::{ChannelError, GeocodeError, StoreError};
use shiftbot::geocode::Geocoder;
use shiftbot::model::{
    Application, ApplicationCounts, Coordinates, JobPosting, NewJobPosting, Profile, User,
};
use shiftbot::store::memory::MemoryBackend;
use shiftbot::store::{
    CapacityStore, Database, SessionRecord, SessionStore, UserStore,
};

struct FixedGeocoder;

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn resolve(&self, _address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        Ok(Some(Coordinates::new(25.0478, 121.5170)))
    }
}

fn build_engine(store: Arc<dyn Database>, channel: Arc<dyn Channel>, config: DialogConfig) -> Arc<Engine> {
    let geocoder: Arc<dyn Geocoder> = Arc::new(FixedGeocoder);
    let service = Arc::new(ApplicationService::new(
        Arc::clone(&store),
        Arc::clone(&geocoder),
        config.store_timeout,
    ));
    let machine = Arc::new(DialogMachine::new(
        Arc::clone(&store),
        service,
        geocoder,
        config.clone(),
    ));
    let channels = Arc::new(ChannelManager::new(vec![channel]));
    Arc::new(Engine::new(store, machine, channels, config))
}

/// Replays a fixed event script on startup. Delivery to the `stuck` user
/// never completes; every other delivery is recorded.
struct ScriptedChannel {
    events: Vec<InboundEvent>,
    replies: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn name(&self) -> &str {
        "test"
    }

    async fn start(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), ChannelError> {
        for event in self.events.clone() {
            events
                .send(event)
                .await
                .map_err(|e| ChannelError::StartupFailed {
                    name: "test".to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn respond(&self, event: &InboundEvent, _reply: OutgoingReply) -> Result<(), ChannelError> {
        if event.user_id == "stuck" {
            std::future::pending::<()>().await;
        }
        let _ = self.replies.send(event.user_id.clone());
        Ok(())
    }
}

#[tokio::test]
async fn stalled_user_does_not_block_routing_for_others() {
    // Far more events from the stuck user than their worker queue holds,
    // then one event from an independent user.
    let mut events = Vec::new();
    for _ in 0..40 {
        events.push(InboundEvent::message("test", "stuck", "hello"));
    }
    events.push(InboundEvent::message("test", "other", "hello"));

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let channel = Arc::new(ScriptedChannel {
        events,
        replies: reply_tx,
    });
    let engine = build_engine(
        Arc::new(MemoryBackend::new()),
        channel,
        DialogConfig::default(),
    );
    let run = tokio::spawn(engine.run());

    let answered = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match reply_rx.recv().await {
                Some(user) if user == "other" => break,
                Some(_) => {}
                None => panic!("reply stream closed before the independent user was answered"),
            }
        }
    })
    .await;
    assert!(
        answered.is_ok(),
        "independent user got no reply while another user's queue was full"
    );
    run.abort();
}

/// Delegates to the memory backend; session saves hang while `stall` is set.
struct StallingSaves {
    inner: MemoryBackend,
    stall: AtomicBool,
}

impl StallingSaves {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            stall: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SessionStore for StallingSaves {
    async fn load_session(&self, user_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        self.inner.load_session(user_id).await
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.save_session(record).await
    }

    async fn prune_stale_sessions(&self, older_than: Duration) -> Result<u64, StoreError> {
        self.inner.prune_stale_sessions(older_than).await
    }
}

#[async_trait]
impl UserStore for StallingSaves {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        self.inner.get_user(user_id).await
    }

    async fn ensure_user(&self, user_id: &str) -> Result<User, StoreError> {
        self.inner.ensure_user(user_id).await
    }

    async fn complete_registration(
        &self,
        user_id: &str,
        profile: &Profile,
    ) -> Result<User, StoreError> {
        self.inner.complete_registration(user_id, profile).await
    }

    async fn deactivate_user(&self, user_id: &str) -> Result<(), StoreError> {
        self.inner.deactivate_user(user_id).await
    }
}

#[async_trait]
impl CapacityStore for StallingSaves {
    async fn create_job(&self, new: NewJobPosting) -> Result<JobPosting, StoreError> {
        self.inner.create_job(new).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<JobPosting>, StoreError> {
        self.inner.get_job(id).await
    }

    async fn list_open_jobs(&self) -> Result<Vec<JobPosting>, StoreError> {
        self.inner.list_open_jobs().await
    }

    async fn close_job(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.close_job(id).await
    }

    async fn apply(&self, user_id: &str, job_id: Uuid) -> Result<ApplyOutcome, StoreError> {
        self.inner.apply(user_id, job_id).await
    }

    async fn cancel_application(&self, application_id: Uuid) -> Result<Application, StoreError> {
        self.inner.cancel_application(application_id).await
    }

    async fn user_applications(&self, user_id: &str) -> Result<Vec<Application>, StoreError> {
        self.inner.user_applications(user_id).await
    }

    async fn find_application(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<Option<Application>, StoreError> {
        self.inner.find_application(user_id, job_id).await
    }

    async fn application_counts(&self, job_id: Uuid) -> Result<ApplicationCounts, StoreError> {
        self.inner.application_counts(job_id).await
    }
}

#[async_trait]
impl Database for StallingSaves {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        self.inner.run_migrations().await
    }
}

/// Records every delivered reply.
struct RecordingChannel {
    replies: mpsc::UnboundedSender<(String, String)>,
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "test"
    }

    async fn start(&self, _events: mpsc::Sender<InboundEvent>) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn respond(&self, event: &InboundEvent, reply: OutgoingReply) -> Result<(), ChannelError> {
        let _ = self.replies.send((event.user_id.clone(), reply.text));
        Ok(())
    }
}

#[tokio::test]
async fn store_timeout_yields_transient_reply_and_keeps_state() {
    let store = Arc::new(StallingSaves::new());
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let channel = Arc::new(RecordingChannel { replies: reply_tx });
    let config = DialogConfig {
        store_timeout: Duration::from_millis(100),
        ..DialogConfig::default()
    };
    let store_dyn: Arc<dyn Database> = store.clone();
    let engine = build_engine(store_dyn, channel, config);

    // A healthy turn stores the first registration step.
    engine
        .process(InboundEvent::postback(
            "test",
            "U1",
            "action=register&step=register",
        ))
        .await;
    let (_, text) = reply_rx.recv().await.unwrap();
    assert_eq!(text, Reply::PromptName.render());
    let before = store.load_session("U1").await.unwrap().unwrap();

    // Session writes hang: the user is told to retry and nothing advances.
    store.stall.store(true, Ordering::SeqCst);
    engine
        .process(InboundEvent::message("test", "U1", "Alice"))
        .await;
    let (_, text) = reply_rx.recv().await.unwrap();
    assert_eq!(text, Reply::TryAgainLater.render());

    store.stall.store(false, Ordering::SeqCst);
    let after = store.load_session("U1").await.unwrap().unwrap();
    assert_eq!(after.state, before.state);
}

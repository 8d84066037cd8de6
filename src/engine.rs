//! Event routing and turn execution.
//!
//! Inbound events fan in from every channel onto one stream; the engine
//! routes each event to a per-user worker so one user's turns run strictly
//! in arrival order while different users proceed in parallel. Each turn
//! loads the session, runs the dialog machine, persists the new state and
//! sends exactly one reply.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::channels::{ChannelManager, InboundEvent, OutgoingReply};
use crate::config::DialogConfig;
use crate::dialog::{DialogMachine, Reply, SessionState};
use crate::error::{Error, StoreError};
use crate::store::{Database, SessionRecord};

/// Queue depth per user; once full, further events for that user are shed
/// with a busy reply so other users keep routing.
const WORKER_QUEUE: usize = 32;

/// An idle worker exits after this long; the next event respawns it.
const WORKER_IDLE: Duration = Duration::from_secs(300);

/// How often the stale-session sweep runs.
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

pub struct Engine {
    store: Arc<dyn Database>,
    machine: Arc<DialogMachine>,
    channels: Arc<ChannelManager>,
    config: DialogConfig,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Database>,
        machine: Arc<DialogMachine>,
        channels: Arc<ChannelManager>,
        config: DialogConfig,
    ) -> Self {
        Self {
            store,
            machine,
            channels,
            config,
        }
    }

    /// Start all channels and run until Ctrl+C or every channel stream ends.
    pub async fn run(self: Arc<Self>) -> Result<(), Error> {
        let mut stream = self.channels.start_all().await?;

        let pruner = {
            let store = Arc::clone(&self.store);
            let older_than = self.config.session_timeout;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match store.prune_stale_sessions(older_than).await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!(pruned = n, "swept stale sessions"),
                        Err(e) => tracing::warn!(error = %e, "session sweep failed"),
                    }
                }
            })
        };

        let mut workers: HashMap<String, mpsc::Sender<InboundEvent>> = HashMap::new();

        tracing::info!("engine ready and listening");
        loop {
            let event = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down");
                    break;
                }
                event = stream.next() => {
                    match event {
                        Some(event) => event,
                        None => {
                            tracing::info!("all channel streams ended, shutting down");
                            break;
                        }
                    }
                }
            };
            self.route(&mut workers, event);
        }

        pruner.abort();
        // Dropping the senders lets in-flight workers drain and exit.
        workers.clear();
        Ok(())
    }

    /// Hand the event to the user's worker, respawning it if the previous
    /// one exited idle. Never blocks the shared dispatch loop: a full queue
    /// sheds the event with a busy reply so one stalled user cannot stall
    /// routing for everyone else.
    fn route(
        self: &Arc<Self>,
        workers: &mut HashMap<String, mpsc::Sender<InboundEvent>>,
        mut event: InboundEvent,
    ) {
        loop {
            let tx = workers
                .entry(event.user_id.clone())
                .or_insert_with(|| self.spawn_worker(&event.user_id));
            match tx.try_send(event) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(returned)) => {
                    tracing::warn!(user = %returned.user_id, "worker queue full, shedding event");
                    let engine = Arc::clone(self);
                    tokio::spawn(async move {
                        let reply = OutgoingReply::text(Reply::TryAgainLater.render());
                        if let Err(e) = engine.channels.respond(&returned, reply).await {
                            tracing::error!(channel = %returned.channel, error = %e, "failed to send busy reply");
                        }
                    });
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => {
                    // Worker hit its idle timeout between lookup and send.
                    event = returned;
                    workers.remove(&event.user_id);
                }
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, user_id: &str) -> mpsc::Sender<InboundEvent> {
        let (tx, mut rx) = mpsc::channel::<InboundEvent>(WORKER_QUEUE);
        let engine = Arc::clone(self);
        let user = user_id.to_string();
        tokio::spawn(async move {
            tracing::debug!(user = %user, "worker started");
            loop {
                match tokio::time::timeout(WORKER_IDLE, rx.recv()).await {
                    Ok(Some(event)) => engine.process(event).await,
                    Ok(None) | Err(_) => break,
                }
            }
            tracing::debug!(user = %user, "worker stopped");
        });
        tx
    }

    /// One turn, one reply. Backend failures never swallow the reply; the
    /// user gets a transient-error message and the stored state is left
    /// untouched so a retry restarts the turn.
    pub async fn process(&self, event: InboundEvent) {
        let reply = match self.turn(&event).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(user = %event.user_id, error = %e, "turn failed");
                Reply::TryAgainLater
            }
        };
        tracing::debug!(user = %event.user_id, reply = reply.kind(), "turn complete");
        if let Err(e) = self
            .channels
            .respond(&event, OutgoingReply::text(reply.render()))
            .await
        {
            tracing::error!(channel = %event.channel, error = %e, "failed to send reply");
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.config.store_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout {
                timeout: self.config.store_timeout,
            })?
    }

    /// Run the dialog machine for one event and persist the resulting state.
    pub async fn turn(&self, event: &InboundEvent) -> Result<Reply, Error> {
        let now = Utc::now();
        let state = match self.bounded(self.store.load_session(&event.user_id)).await? {
            Some(record) if !record.is_stale(now, self.config.session_timeout) => record.state,
            Some(_) => {
                tracing::debug!(user = %event.user_id, "session expired, starting fresh");
                SessionState::Idle
            }
            None => SessionState::Idle,
        };

        let (next, reply) = self
            .machine
            .handle(&event.user_id, state, &event.kind)
            .await?;

        let record = SessionRecord::new(event.user_id.clone(), next);
        self.bounded(self.store.save_session(&record)).await?;
        Ok(reply)
    }
}

//! The dialog state machine.
//!
//! One call per inbound event: given the user's current [`SessionState`] and
//! the event, produce the next state and exactly one [`Reply`]. The machine
//! performs the turn's side effects itself (user store reads/writes, at most
//! one apply transaction, at most one geocode) but never touches the session
//! store; the engine persists the returned state.

use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::capacity::{ApplicationService, ApplyOutcome};
use crate::channels::{EventKind, Postback, PostbackAction, PostbackStep};
use crate::config::DialogConfig;
use crate::dialog::listing::{paginate, rank_jobs};
use crate::dialog::reply::Reply;
use crate::dialog::state::{RegStep, RegistrationDraft, SessionState};
use crate::dialog::validate;
use crate::error::StoreError;
use crate::geocode::Geocoder;
use crate::model::{Profile, User};
use crate::store::Database;

pub struct DialogMachine {
    store: Arc<dyn Database>,
    applications: Arc<ApplicationService>,
    geocoder: Arc<dyn Geocoder>,
    config: DialogConfig,
}

impl DialogMachine {
    pub fn new(
        store: Arc<dyn Database>,
        applications: Arc<ApplicationService>,
        geocoder: Arc<dyn Geocoder>,
        config: DialogConfig,
    ) -> Self {
        Self {
            store,
            applications,
            geocoder,
            config,
        }
    }

    /// Bound a direct store call the same way the application service bounds
    /// its own.
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

    /// Run one turn. An `Err` means a transient backend failure; the caller
    /// replies with [`Reply::TryAgainLater`] and leaves the stored state
    /// untouched so a retry restarts the turn cleanly.
    pub async fn handle(
        &self,
        user_id: &str,
        state: SessionState,
        kind: &EventKind,
    ) -> Result<(SessionState, Reply), StoreError> {
        let user = self.bounded(self.store.ensure_user(user_id)).await?;
        match kind {
            EventKind::Postback(raw) => match Postback::parse(raw) {
                Ok(postback) => self.handle_postback(&user, state, postback).await,
                Err(e) => {
                    tracing::warn!(user = user_id, error = %e, "unparseable postback");
                    Ok((state, Reply::Help))
                }
            },
            EventKind::Message(text) => self.handle_message(&user, state, text).await,
        }
    }

    async fn handle_postback(
        &self,
        user: &User,
        state: SessionState,
        postback: Postback,
    ) -> Result<(SessionState, Reply), StoreError> {
        match (postback.action, postback.step) {
            (PostbackAction::Register, PostbackStep::Register) => {
                if user.registered {
                    Ok((SessionState::Idle, Reply::AlreadyRegistered { user: user.clone() }))
                } else {
                    Ok((SessionState::start_registration(), Reply::PromptName))
                }
            }
            (PostbackAction::Job, PostbackStep::List) => {
                // Repeating the list action pages through the listing.
                let requested = match state {
                    SessionState::BrowsingJobs { page } => page + 1,
                    _ => 0,
                };
                self.show_listing(user, requested).await
            }
            (PostbackAction::Job, PostbackStep::View) => {
                let Some(job_id) = postback.job_id else {
                    return Ok((state, Reply::Help));
                };
                self.show_job(user, job_id).await
            }
            (PostbackAction::Job, PostbackStep::Apply) => {
                let Some(job_id) = postback.job_id else {
                    return Ok((state, Reply::Help));
                };
                if !user.registered {
                    return Ok((SessionState::start_registration(), Reply::RegistrationRequired));
                }
                // A redelivered apply postback while already confirming the
                // same job must not queue a second transaction.
                if state == (SessionState::ConfirmApply { job_id }) {
                    return Ok((state, Reply::ConfirmReminder));
                }
                match self.applications.get_job(job_id).await? {
                    None => Ok((SessionState::Idle, Reply::JobNotFound)),
                    Some(job) => {
                        let existing = self
                            .bounded(self.store.find_application(&user.id, job_id))
                            .await?;
                        if existing.is_some() {
                            Ok((
                                SessionState::Idle,
                                Reply::AlreadyApplied { job_title: job.title },
                            ))
                        } else {
                            Ok((
                                SessionState::ConfirmApply { job_id },
                                Reply::ConfirmApply { job },
                            ))
                        }
                    }
                }
            }
            (PostbackAction::Job, PostbackStep::MyApplications) => {
                self.show_applications(user).await
            }
            (PostbackAction::ViewProfile, PostbackStep::View) => {
                if !user.registered {
                    Ok((SessionState::start_registration(), Reply::RegistrationRequired))
                } else {
                    Ok((SessionState::ViewingProfile, Reply::Profile { user: user.clone() }))
                }
            }
            other => {
                tracing::warn!(user = %user.id, pair = ?other, "postback pair has no handler");
                Ok((state, Reply::Help))
            }
        }
    }

    async fn handle_message(
        &self,
        user: &User,
        state: SessionState,
        text: &str,
    ) -> Result<(SessionState, Reply), StoreError> {
        if validate::is_cancel(text) {
            return Ok(match state {
                SessionState::Registering { .. } => {
                    (SessionState::Idle, Reply::RegistrationCancelled)
                }
                SessionState::ConfirmApply { job_id } => {
                    (SessionState::ViewingJob { job_id }, Reply::ApplyAborted)
                }
                _ => (
                    SessionState::Idle,
                    Reply::MainMenu {
                        registered: user.registered,
                    },
                ),
            });
        }

        match state {
            SessionState::Registering { step, draft } => {
                self.handle_registration(user, step, draft, text).await
            }
            SessionState::ConfirmApply { job_id } => {
                self.handle_confirmation(user, job_id, text).await
            }
            _ => Ok((
                SessionState::Idle,
                Reply::MainMenu {
                    registered: user.registered,
                },
            )),
        }
    }

    async fn handle_registration(
        &self,
        user: &User,
        step: RegStep,
        mut draft: RegistrationDraft,
        text: &str,
    ) -> Result<(SessionState, Reply), StoreError> {
        match step {
            RegStep::Name => match validate::validate_name(text) {
                Some(name) => {
                    draft.display_name = Some(name.clone());
                    Ok((
                        SessionState::Registering {
                            step: RegStep::Phone,
                            draft,
                        },
                        Reply::PromptPhone { display_name: name },
                    ))
                }
                None => Ok((
                    SessionState::Registering { step, draft },
                    Reply::InvalidName,
                )),
            },
            RegStep::Phone => match validate::validate_phone(text) {
                Some(phone) => {
                    draft.phone = Some(phone);
                    Ok((
                        SessionState::Registering {
                            step: RegStep::Address,
                            draft,
                        },
                        Reply::PromptAddress,
                    ))
                }
                None => Ok((
                    SessionState::Registering { step, draft },
                    Reply::InvalidPhone,
                )),
            },
            RegStep::Address => {
                let address = text.trim();
                if address.is_empty() {
                    return Ok((
                        SessionState::Registering { step, draft },
                        Reply::UnresolvableAddress,
                    ));
                }
                // Geocoding failures, including timeouts, keep the user on
                // the address step rather than aborting the whole flow.
                let coords = match self.geocoder.resolve(address).await {
                    Ok(Some(coords)) => coords,
                    Ok(None) => {
                        return Ok((
                            SessionState::Registering { step, draft },
                            Reply::UnresolvableAddress,
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(user = %user.id, error = %e, "geocode failed during registration");
                        return Ok((
                            SessionState::Registering { step, draft },
                            Reply::UnresolvableAddress,
                        ));
                    }
                };
                let profile = Profile {
                    display_name: draft.display_name.clone().unwrap_or_default(),
                    phone: draft.phone.clone().unwrap_or_default(),
                    address: address.to_string(),
                    coords,
                };
                let user = self
                    .bounded(self.store.complete_registration(&user.id, &profile))
                    .await?;
                Ok((SessionState::Idle, Reply::RegistrationComplete { user }))
            }
        }
    }

    async fn handle_confirmation(
        &self,
        user: &User,
        job_id: Uuid,
        text: &str,
    ) -> Result<(SessionState, Reply), StoreError> {
        if validate::is_negative(text) {
            return Ok((SessionState::ViewingJob { job_id }, Reply::ApplyAborted));
        }
        if !validate::is_affirmative(text) {
            return Ok((SessionState::ConfirmApply { job_id }, Reply::ConfirmReminder));
        }

        let Some(job) = self.applications.get_job(job_id).await? else {
            return Ok((SessionState::Idle, Reply::JobNotFound));
        };
        let reply = match self.applications.apply(&user.id, job_id).await? {
            ApplyOutcome::Accepted(application) => Reply::Applied {
                job_title: job.title,
                application,
            },
            ApplyOutcome::AlreadyApplied => Reply::AlreadyApplied { job_title: job.title },
            ApplyOutcome::JobFull => Reply::JobFull { job_title: job.title },
            ApplyOutcome::JobClosed => Reply::JobClosed { job_title: job.title },
        };
        Ok((SessionState::Idle, reply))
    }

    async fn show_listing(
        &self,
        user: &User,
        requested: usize,
    ) -> Result<(SessionState, Reply), StoreError> {
        let jobs = self.applications.list_open_jobs().await?;
        if jobs.is_empty() {
            return Ok((SessionState::Idle, Reply::NoOpenJobs));
        }
        let by_distance = user.coords.is_some();
        let ranked = rank_jobs(jobs, user.coords);
        let page = paginate(ranked, requested, self.config.page_size);
        Ok((
            SessionState::BrowsingJobs { page: page.index },
            Reply::JobList { page, by_distance },
        ))
    }

    async fn show_job(&self, user: &User, job_id: Uuid) -> Result<(SessionState, Reply), StoreError> {
        match self.applications.get_job(job_id).await? {
            None => Ok((SessionState::Idle, Reply::JobNotFound)),
            Some(job) => {
                let already_applied = self
                    .bounded(self.store.find_application(&user.id, job_id))
                    .await?
                    .is_some();
                Ok((
                    SessionState::ViewingJob { job_id },
                    Reply::JobDetail {
                        job,
                        already_applied,
                    },
                ))
            }
        }
    }

    async fn show_applications(&self, user: &User) -> Result<(SessionState, Reply), StoreError> {
        let applications = self.applications.user_applications(&user.id).await?;
        if applications.is_empty() {
            return Ok((SessionState::ViewingApplications, Reply::NoApplications));
        }
        let mut entries = Vec::with_capacity(applications.len());
        for application in applications {
            let job = self.applications.get_job(application.job_id).await?;
            entries.push((application, job));
        }
        Ok((
            SessionState::ViewingApplications,
            Reply::ApplicationsList { entries },
        ))
    }
}

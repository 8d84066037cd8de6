//! Outbound reply kinds.
//!
//! Every turn produces exactly one [`Reply`]. Keeping the kinds as an enum
//! (instead of formatting strings inline in the machine) is what makes the
//! session-determinism property checkable: tests compare `kind()` sequences
//! without coupling to wording.

use crate::dialog::listing::Page;
use crate::model::{Application, JobPosting, User};

/// Everything the dialog machine can say.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Idle fallback: the service menu, registration-aware.
    MainMenu { registered: bool },
    /// Unknown or malformed structured action.
    Help,
    /// The action needs a registered user; the registration flow starts now.
    RegistrationRequired,
    PromptName,
    PromptPhone { display_name: String },
    PromptAddress,
    InvalidName,
    InvalidPhone,
    UnresolvableAddress,
    RegistrationComplete { user: User },
    AlreadyRegistered { user: User },
    RegistrationCancelled,
    JobList { page: Page, by_distance: bool },
    NoOpenJobs,
    JobDetail { job: JobPosting, already_applied: bool },
    JobNotFound,
    ConfirmApply { job: JobPosting },
    /// Nudge while waiting for a yes/no in the confirm state.
    ConfirmReminder,
    Applied { job_title: String, application: Application },
    JobFull { job_title: String },
    JobClosed { job_title: String },
    AlreadyApplied { job_title: String },
    ApplyAborted,
    ApplicationsList { entries: Vec<(Application, Option<JobPosting>)> },
    NoApplications,
    Profile { user: User },
    /// Transient backend failure; state was not advanced.
    TryAgainLater,
}

impl Reply {
    /// Stable tag for tests and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MainMenu { .. } => "main_menu",
            Self::Help => "help",
            Self::RegistrationRequired => "registration_required",
            Self::PromptName => "prompt_name",
            Self::PromptPhone { .. } => "prompt_phone",
            Self::PromptAddress => "prompt_address",
            Self::InvalidName => "invalid_name",
            Self::InvalidPhone => "invalid_phone",
            Self::UnresolvableAddress => "unresolvable_address",
            Self::RegistrationComplete { .. } => "registration_complete",
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::RegistrationCancelled => "registration_cancelled",
            Self::JobList { .. } => "job_list",
            Self::NoOpenJobs => "no_open_jobs",
            Self::JobDetail { .. } => "job_detail",
            Self::JobNotFound => "job_not_found",
            Self::ConfirmApply { .. } => "confirm_apply",
            Self::ConfirmReminder => "confirm_reminder",
            Self::Applied { .. } => "applied",
            Self::JobFull { .. } => "job_full",
            Self::JobClosed { .. } => "job_closed",
            Self::AlreadyApplied { .. } => "already_applied",
            Self::ApplyAborted => "apply_aborted",
            Self::ApplicationsList { .. } => "applications_list",
            Self::NoApplications => "no_applications",
            Self::Profile { .. } => "profile",
            Self::TryAgainLater => "try_again_later",
        }
    }

    /// Render to the single text message sent back on the channel.
    pub fn render(&self) -> String {
        match self {
            Self::MainMenu { registered } => {
                let mut text = String::new();
                if !*registered {
                    text.push_str("You are not registered yet; register first to apply for shifts.\n\n");
                }
                text.push_str(
                    "Pick a service:\n\
                     - jobs: action=job&step=list\n\
                     - my applications: action=job&step=my_applications\n\
                     - profile: action=view_profile&step=view\n\
                     - register: action=register&step=register",
                );
                text
            }
            Self::Help => {
                "Sorry, I did not understand that action. Send the menu again to pick a service."
                    .to_string()
            }
            Self::RegistrationRequired => {
                "That needs a registered account. Let's register first.\n\nStep 1: please enter your name."
                    .to_string()
            }
            Self::PromptName => {
                "Welcome! Let's get you registered.\n\nStep 1: please enter your name.".to_string()
            }
            Self::PromptPhone { display_name } => format!(
                "Name recorded: {display_name}\n\nStep 2: please enter your mobile number (10 digits, e.g. 0912345678)."
            ),
            Self::PromptAddress => {
                "Phone recorded.\n\nStep 3: please enter your address.".to_string()
            }
            Self::InvalidName => "Name cannot be empty, please enter it again.".to_string(),
            Self::InvalidPhone => {
                "That phone number looks wrong. Please enter 10 digits starting with 09 (e.g. 0912345678)."
                    .to_string()
            }
            Self::UnresolvableAddress => {
                "I could not locate that address. Please enter it again, or send 'cancel' to stop."
                    .to_string()
            }
            Self::RegistrationComplete { user } => format!(
                "Registration complete!\n\n{}\nYou can now browse and apply for shifts.",
                render_profile(user)
            ),
            Self::AlreadyRegistered { user } => {
                format!("You are already registered.\n\n{}", render_profile(user))
            }
            Self::RegistrationCancelled => {
                "Registration cancelled. Send 'register' from the menu to start again.".to_string()
            }
            Self::JobList { page, by_distance } => {
                let mut text = format!(
                    "Open shifts (page {}/{}, {} total{}):\n",
                    page.index + 1,
                    page.pages,
                    page.total,
                    if *by_distance { ", nearest first" } else { "" }
                );
                for job in &page.jobs {
                    text.push_str(&format!(
                        "\n{title}\n  {address}\n  {start} - {end}\n  {remaining}/{total} slots left\n  view: action=job&step=view&job_id={id}",
                        title = job.title,
                        address = job.address,
                        start = job.starts_at.format("%Y-%m-%d %H:%M"),
                        end = job.ends_at.format("%H:%M"),
                        remaining = job.remaining,
                        total = job.total_capacity,
                        id = job.id,
                    ));
                }
                text
            }
            Self::NoOpenJobs => {
                "There are no open shifts right now. Please check back later.".to_string()
            }
            Self::JobDetail {
                job,
                already_applied,
            } => {
                let mut text = format!(
                    "{title}\n\nLocation: {address}\nSchedule: {start} - {end}\nSlots left: {remaining}/{total}\n",
                    title = job.title,
                    address = job.address,
                    start = job.starts_at.format("%Y-%m-%d %H:%M"),
                    end = job.ends_at.format("%Y-%m-%d %H:%M"),
                    remaining = job.remaining,
                    total = job.total_capacity,
                );
                if *already_applied {
                    text.push_str("\nYou have already applied for this shift.");
                } else {
                    text.push_str(&format!(
                        "\napply: action=job&step=apply&job_id={}",
                        job.id
                    ));
                }
                text
            }
            Self::JobNotFound => "That job no longer exists.".to_string(),
            Self::ConfirmApply { job } => format!(
                "Apply for this shift?\n\n{title}\n{address}\n{start}\n\nReply 'yes' to confirm or 'no' to go back.",
                title = job.title,
                address = job.address,
                start = job.starts_at.format("%Y-%m-%d %H:%M"),
            ),
            Self::ConfirmReminder => {
                "Please reply 'yes' to confirm the application or 'no' to go back.".to_string()
            }
            Self::Applied {
                job_title,
                application,
            } => format!(
                "Application confirmed!\n\nShift: {job_title}\nApplication id: {}\nApplied at: {}\n\nWe will be in touch.",
                application.id,
                application.created_at.format("%Y-%m-%d %H:%M"),
            ),
            Self::JobFull { job_title } => {
                format!("Sorry, '{job_title}' is already full. No application was made.")
            }
            Self::JobClosed { job_title } => {
                format!("Sorry, '{job_title}' has been closed. No application was made.")
            }
            Self::AlreadyApplied { job_title } => {
                format!("You have already applied for '{job_title}'.")
            }
            Self::ApplyAborted => "Okay, not applying.".to_string(),
            Self::ApplicationsList { entries } => {
                let mut text = format!("Your applications ({}):\n", entries.len());
                for (app, job) in entries {
                    match job {
                        Some(job) => text.push_str(&format!(
                            "\n{title}\n  {start}\n  id {id}",
                            title = job.title,
                            start = job.starts_at.format("%Y-%m-%d %H:%M"),
                            id = app.id,
                        )),
                        None => text.push_str(&format!(
                            "\n(job removed)\n  id {id}",
                            id = app.id
                        )),
                    }
                }
                text
            }
            Self::NoApplications => {
                "You have no applications yet. Browse the job list to find a shift.".to_string()
            }
            Self::Profile { user } => render_profile(user),
            Self::TryAgainLater => {
                "Something went wrong on our side. Please try again in a moment.".to_string()
            }
        }
    }
}

fn render_profile(user: &User) -> String {
    format!(
        "Your profile:\n- name: {}\n- phone: {}\n- address: {}\n",
        user.display_name.as_deref().unwrap_or("(not set)"),
        user.phone.as_deref().unwrap_or("(not set)"),
        user.address.as_deref().unwrap_or("(not set)"),
    )
}

//! `spinpost-scheduler` — exactly-once campaign triggering from stored schedules.
//!
//! # Overview
//!
//! Schedules live in the `schedules` collection of the shared repository.
//! The [`engine::SchedulerEngine`] evaluates them on a fixed interval. An
//! occurrence is due when the current local time falls inside the trigger
//! window after its fire time; it is written to the triggered ledger *before*
//! the campaign is launched, so a restart in between never fires it twice.
//!
//! # Frequencies
//!
//! | Variant   | Fires                                              |
//! |-----------|----------------------------------------------------|
//! | `Once`    | On `start_date` at `time_of_day`, then completed   |
//! | `Daily`   | Every day from `start_date`                        |
//! | `Weekly`  | On each listed weekday (0 = Monday … 6 = Sunday)   |
//! | `Monthly` | On each listed day of the month (1–31)             |

pub mod engine;
pub mod error;
pub mod schedule;
pub mod store;

pub use engine::{CampaignLauncher, SchedulerEngine, TickReport};
pub use error::{Result, SchedulerError};
pub use schedule::{due_occurrence, validate_draft, Occurrence};
pub use store::ScheduleStore;

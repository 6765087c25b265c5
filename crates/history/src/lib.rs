//! Machine History Store / Blacklist Engine.
//!
//! Tracks every `create_instance` attempt per `(provider, machine_id)` and
//! derives a blacklist from the failure rate, so the scheduler and search
//! path can avoid machines that keep failing without an operator having to
//! watch for it.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod attempt;
mod blacklist;
mod error;
mod store;

pub use attempt::{CreationAttempt, FailingStage};
pub use blacklist::{
    BlacklistFilter, BlacklistType, MachineBlacklistEntry, OfferAnnotation, ReliabilityStatus,
};
pub use error::HistoryError;
pub use store::{BlacklistPolicy, MachineHistoryStore};

//! Repository Layer (C11).
//!
//! Per-aggregate CRUD interfaces — `UserRepo`, `ServerlessRepo`,
//! `MachineHistoryRepo` — plus an in-memory implementation suitable for a
//! single control-plane process and for tests. A `sqlx`-backed
//! implementation would satisfy the same traits; no caller holds a session
//! across a component boundary.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod memory;
mod model;
mod traits;

pub use error::RepositoryError;
pub use memory::InMemoryRepository;
pub use model::{
    InstanceRecord, InstanceState, MachineAttemptRecord, NewInstanceRecord, NewUser, UserRecord,
};
pub use traits::{MachineHistoryRepo, ServerlessRepo, UserRepo};

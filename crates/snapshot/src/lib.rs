//! Snapshot Engine (C3).
//!
//! Creates, lists, restores, deletes and prunes backups through a
//! restic-compatible CLI run on the remote instance over a secure shell
//! transport — the engine never shells out locally, since the data to
//! back up lives on the instance.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod engine;
mod error;
mod model;
mod transport;

pub use engine::{RepositoryCredentials, SnapshotEngine};
pub use error::SnapshotError;
pub use model::{PruneResult, RestoreResult, Snapshot, SnapshotSummary};
pub use transport::{CommandOutput, ShellTransport, SshTransport};

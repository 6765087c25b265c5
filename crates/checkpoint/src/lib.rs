//! Checkpoint Engine (C4).
//!
//! Suspends a GPU process's CUDA context, dumps its image via CRIU, and
//! reverses the process on restore. Enforces a matching driver-major
//! version between the checkpoint's origin and its restore target, since
//! the underlying tooling does not tolerate a mismatch.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod engine;
mod error;
mod model;
mod transport;

pub use engine::CheckpointEngine;
pub use error::CheckpointError;
pub use model::{Checkpoint, RestoreResult};
pub use transport::{CommandOutput, ShellTransport, SshTransport};

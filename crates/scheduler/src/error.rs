//! Error taxonomy for the serverless scheduler.

use checkpoint::CheckpointError;
use gpu::GpuProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("no serverless binding for fleet instance {0}")]
    NotFound(i64),

    #[error("serverless binding already enabled for fleet instance {0}")]
    AlreadyEnabled(i64),

    #[error("fleet instance {0} is currently waking, try again shortly")]
    WakeInProgress(i64),

    #[error("fleet instance {0} is not paused")]
    NotPaused(i64),

    #[error("gpu provider error: {0}")]
    Gpu(#[from] GpuProviderError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("shell did not become ready within {0}s after resume")]
    ShellTimeout(u64),

    #[error("all fallback strategies failed for fleet instance {0}")]
    AllFallbacksFailed(i64),

    #[error("fallback strategy {0} has no usable identifier for this binding")]
    FallbackUnsupported(&'static str),

    #[error("no offer available under the fallback price cap")]
    NoOfferAvailable,
}

//! Error taxonomy for the standby manager.

use gpu::GpuProviderError;
use cpu::CpuProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StandbyError {
    #[error("standby manager not configured")]
    NotConfigured,

    #[error("standby association already exists for gpu instance {0}")]
    AlreadyExists(String),

    #[error("no standby association for gpu instance {0}")]
    NotFound(String),

    #[error("gpu provider error: {0}")]
    Gpu(#[from] GpuProviderError),

    #[error("cpu provider error: {0}")]
    Cpu(#[from] CpuProviderError),

    #[error("cpu standby vm did not become reachable within {0}s")]
    ShellTimeout(u64),

    #[error("sync transport error: {0}")]
    Transport(String),

    #[error("no gpu offer available matching recovery filters")]
    NoOfferAvailable,

    #[error("recovery exhausted after {0} attempts")]
    RecoveryExhausted(u32),

    #[error("association for gpu instance {0} is not in a failed-over state")]
    NotFailedOver(String),
}

impl StandbyError {
    /// Whether this error represents a condition the caller should treat
    /// as best-effort (log and continue) rather than fail the surrounding
    /// operation. `on_gpu_created` is the only caller that consults this.
    #[must_use]
    pub const fn is_best_effort(&self) -> bool {
        !matches!(self, Self::NotConfigured)
    }
}

//! Error taxonomy for the Instance Service and Agent Ingress.
//!
//! [`ErrorKind`] is the component-agnostic classification from §7: every
//! crate in this workspace defines its own `thiserror` enum scoped to its
//! component, and this is the one place those enums get folded into a
//! shared vocabulary a façade could map onto HTTP status codes. The mapping
//! is many-to-one and context-dependent (a `NotFound` from the provider
//! means something different than a `NotFound` from the repository), so
//! it is a `kind()` method on [`ServiceError`], not a blanket `From` impl.

use gpu::GpuProviderError;
use history::HistoryError;
use repository::RepositoryError;
use scheduler::SchedulerError;
use snapshot::SnapshotError;
use standby::StandbyError;
use thiserror::Error;

/// Component-agnostic error classification, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    ProviderTransient,
    ProviderFatal,
    InsufficientBalance,
    OfferUnavailable,
    ServiceUnavailable,
    SnapshotFailed,
    ShellFailed,
    RepositoryFailed,
    CheckpointFailed,
    Cancelled,
}

/// Errors raised by [`crate::InstanceService`] and [`crate::AgentIngress`].
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("gpu provider error: {0}")]
    Gpu(#[from] GpuProviderError),

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("standby manager error: {0}")]
    Standby(#[from] StandbyError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("snapshot engine error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("no snapshot engine configured for migration")]
    SnapshotNotConfigured,
}

impl ServiceError {
    /// Classify this error into the component-agnostic [`ErrorKind`] a
    /// façade would use to pick an HTTP status.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::InsufficientBalance(_) => ErrorKind::InsufficientBalance,
            Self::ServiceUnavailable(_) | Self::SnapshotNotConfigured => {
                ErrorKind::ServiceUnavailable
            }
            Self::Gpu(e) => gpu_kind(e),
            Self::History(_) => ErrorKind::RepositoryFailed,
            Self::Standby(e) => standby_kind(e),
            Self::Scheduler(e) => scheduler_kind(e),
            Self::Snapshot(_) => ErrorKind::SnapshotFailed,
            Self::Repository(e) => repository_kind(e),
        }
    }
}

fn gpu_kind(e: &GpuProviderError) -> ErrorKind {
    match e {
        GpuProviderError::Transient(_) | GpuProviderError::Transport(_) => {
            ErrorKind::ProviderTransient
        }
        GpuProviderError::RateLimited { .. } => ErrorKind::ProviderTransient,
        GpuProviderError::InvalidRequest(_) | GpuProviderError::Serialization(_) => {
            ErrorKind::Validation
        }
        GpuProviderError::Unauthorized(_) => ErrorKind::Authorization,
        GpuProviderError::NotFound(_) => ErrorKind::NotFound,
        GpuProviderError::OfferUnavailable(_) => ErrorKind::OfferUnavailable,
        GpuProviderError::Config(_) => ErrorKind::ProviderFatal,
    }
}

fn standby_kind(e: &StandbyError) -> ErrorKind {
    match e {
        StandbyError::NotConfigured => ErrorKind::ServiceUnavailable,
        StandbyError::AlreadyExists(_) | StandbyError::NotFound(_) | StandbyError::NotFailedOver(_) => {
            ErrorKind::NotFound
        }
        StandbyError::Gpu(inner) => gpu_kind(inner),
        StandbyError::Cpu(_) => ErrorKind::ProviderFatal,
        StandbyError::ShellTimeout(_) | StandbyError::Transport(_) => ErrorKind::ShellFailed,
        StandbyError::NoOfferAvailable => ErrorKind::OfferUnavailable,
        StandbyError::RecoveryExhausted(_) => ErrorKind::ProviderFatal,
    }
}

fn scheduler_kind(e: &SchedulerError) -> ErrorKind {
    match e {
        SchedulerError::NotFound(_) => ErrorKind::NotFound,
        SchedulerError::AlreadyEnabled(_) | SchedulerError::NotPaused(_) => ErrorKind::Validation,
        SchedulerError::WakeInProgress(_) => ErrorKind::ServiceUnavailable,
        SchedulerError::Gpu(inner) => gpu_kind(inner),
        SchedulerError::Checkpoint(_) => ErrorKind::CheckpointFailed,
        SchedulerError::ShellTimeout(_) => ErrorKind::ShellFailed,
        SchedulerError::AllFallbacksFailed(_) | SchedulerError::NoOfferAvailable => {
            ErrorKind::OfferUnavailable
        }
        SchedulerError::FallbackUnsupported(_) => ErrorKind::Validation,
    }
}

fn repository_kind(e: &RepositoryError) -> ErrorKind {
    match e {
        RepositoryError::NotFound { .. } => ErrorKind::NotFound,
        RepositoryError::Conflict { .. } | RepositoryError::Invalid { .. } => {
            ErrorKind::RepositoryFailed
        }
    }
}

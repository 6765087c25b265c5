//! Fallback strategies tried, in order, when a paused instance fails to
//! resume. Grounded in the original's `SnapshotStrategy`/`DiskMigrationStrategy`
//! pair: both search for a replacement offer and stand up a new instance,
//! differing only in what they use to recreate the old instance's state.

use std::sync::Arc;

use async_trait::async_trait;
use gpu::{CreateInstanceRequest, GpuProvider, OfferFilter};
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::model::ServerlessBinding;

/// Result of a single fallback strategy attempt.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub strategy: &'static str,
    pub new_gpu_instance_id: String,
    pub new_dph_total: f64,
}

/// One way to recreate a failed instance's state on fresh capacity.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(
        &self,
        binding: &ServerlessBinding,
        max_price_per_hour: f64,
    ) -> Result<FallbackOutcome, SchedulerError>;
}

/// Re-create the instance from its most recent checkpoint, on a freshly
/// searched offer. Requires `binding.last_checkpoint_id` to be set; the
/// provider's create-instance request carries the checkpoint id as its
/// startup directive, mirroring the original's template/clone approach.
pub struct SnapshotFallbackStrategy {
    gpu: Arc<dyn GpuProvider>,
    disk_gb: u32,
}

impl SnapshotFallbackStrategy {
    #[must_use]
    pub fn new(gpu: Arc<dyn GpuProvider>, disk_gb: u32) -> Self {
        Self { gpu, disk_gb }
    }
}

#[async_trait]
impl FallbackStrategy for SnapshotFallbackStrategy {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn attempt(
        &self,
        binding: &ServerlessBinding,
        max_price_per_hour: f64,
    ) -> Result<FallbackOutcome, SchedulerError> {
        let Some(checkpoint_id) = binding.last_checkpoint_id.clone() else {
            return Err(SchedulerError::FallbackUnsupported("snapshot"));
        };

        let filter = OfferFilter {
            max_price_per_hour: Some(max_price_per_hour),
            verified_only: true,
            limit: 5,
            ..Default::default()
        };
        let offers = self.gpu.search_offers(&filter).await?;
        let offer = offers.into_iter().next().ok_or(SchedulerError::NoOfferAvailable)?;

        info!(
            fleet_instance_id = binding.fleet_instance_id,
            checkpoint_id, price = offer.price_per_hour, "snapshot fallback: creating replacement instance"
        );

        let instance = self
            .gpu
            .create_instance(CreateInstanceRequest {
                offer_id: offer.id,
                image: "fleet/restore".to_string(),
                disk_gb: self.disk_gb,
                label: Some(format!("fleet:fallback:snapshot:{}", binding.gpu_instance_id)),
                ports: Vec::new(),
                onstart: Some(format!("restore-checkpoint {checkpoint_id}")),
            })
            .await?;

        Ok(FallbackOutcome {
            strategy: "snapshot",
            new_gpu_instance_id: instance.id,
            new_dph_total: instance.dph_total,
        })
    }
}

/// Re-create the instance by attaching its original persistent disk to a
/// new instance on fresh capacity. Requires `binding.disk_id`.
pub struct DiskMigrationFallbackStrategy {
    gpu: Arc<dyn GpuProvider>,
    disk_gb: u32,
}

impl DiskMigrationFallbackStrategy {
    #[must_use]
    pub fn new(gpu: Arc<dyn GpuProvider>, disk_gb: u32) -> Self {
        Self { gpu, disk_gb }
    }
}

#[async_trait]
impl FallbackStrategy for DiskMigrationFallbackStrategy {
    fn name(&self) -> &'static str {
        "disk_migration"
    }

    async fn attempt(
        &self,
        binding: &ServerlessBinding,
        max_price_per_hour: f64,
    ) -> Result<FallbackOutcome, SchedulerError> {
        let Some(disk_id) = binding.disk_id.clone() else {
            return Err(SchedulerError::FallbackUnsupported("disk_migration"));
        };

        let filter = OfferFilter {
            max_price_per_hour: Some(max_price_per_hour),
            verified_only: true,
            limit: 5,
            ..Default::default()
        };
        let offers = self.gpu.search_offers(&filter).await?;
        let offer = offers.into_iter().next().ok_or(SchedulerError::NoOfferAvailable)?;

        info!(
            fleet_instance_id = binding.fleet_instance_id,
            disk_id, price = offer.price_per_hour, "disk migration fallback: creating replacement instance"
        );

        let instance = self
            .gpu
            .create_instance(CreateInstanceRequest {
                offer_id: offer.id,
                image: "fleet/restore".to_string(),
                disk_gb: self.disk_gb,
                label: Some(format!("fleet:fallback:disk:{}", binding.gpu_instance_id)),
                ports: Vec::new(),
                onstart: Some(format!("attach-disk {disk_id}")),
            })
            .await?;

        Ok(FallbackOutcome {
            strategy: "disk_migration",
            new_gpu_instance_id: instance.id,
            new_dph_total: instance.dph_total,
        })
    }
}

/// Try each strategy in order, stopping at the first success.
pub async fn run_fallback(
    strategies: &[Arc<dyn FallbackStrategy>],
    binding: &ServerlessBinding,
    max_price_per_hour: f64,
) -> Result<FallbackOutcome, SchedulerError> {
    for strategy in strategies {
        match strategy.attempt(binding, max_price_per_hour).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                warn!(
                    fleet_instance_id = binding.fleet_instance_id,
                    strategy = strategy.name(),
                    error = %err,
                    "fallback strategy failed, trying next"
                );
            }
        }
    }
    Err(SchedulerError::AllFallbacksFailed(binding.fleet_instance_id))
}

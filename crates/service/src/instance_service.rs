//! Instance Service (C9): high-level orchestration over the provider,
//! machine history, and standby components.
//!
//! Grounded on `examples/original_source/src/domain/services/
//! instance_service.py`'s orchestration order (search → validate → create
//! → record attempt → enqueue standby), generalized with the blacklist
//! annotation and standby enqueue steps the original left to other
//! services.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use events::{EventBus, FleetEvent};
use gpu::{
    CreateInstanceRequest as GpuCreateInstanceRequest, GpuProvider, Instance, OfferFilter,
};
use history::{CreationAttempt, FailingStage, MachineHistoryStore};
use snapshot::SnapshotEngine;
use standby::{FailureReason, StandbyManager};
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::model::{
    AnnotatedOffer, CreateInstanceParams, DestroyReason, MigrateOutcome, MigrateParams,
    ValidationResult,
};

/// Orchestrates GPU instance operations over a single provider, annotated
/// with machine-history reliability data and (optionally) backed by a
/// standby manager and a snapshot engine for migration.
pub struct InstanceService {
    gpu: Arc<dyn GpuProvider>,
    history: Arc<MachineHistoryStore>,
    standby: Option<Arc<StandbyManager>>,
    snapshot: Option<Arc<SnapshotEngine>>,
    events: Arc<EventBus>,
    gpu_provider_name: String,
}

impl InstanceService {
    #[must_use]
    pub fn new(
        gpu: Arc<dyn GpuProvider>,
        history: Arc<MachineHistoryStore>,
        standby: Option<Arc<StandbyManager>>,
        snapshot: Option<Arc<SnapshotEngine>>,
        events: Arc<EventBus>,
        gpu_provider_name: impl Into<String>,
    ) -> Self {
        Self {
            gpu,
            history,
            standby,
            snapshot,
            events,
            gpu_provider_name: gpu_provider_name.into(),
        }
    }

    /// Search for offers, annotated with blacklist/reliability data in a
    /// single batched history lookup (§4.2's annotation batching note).
    ///
    /// # Errors
    /// Propagates a provider error from `search_offers`.
    pub async fn search_offers(
        &self,
        filter: &OfferFilter,
        include_blacklisted: bool,
    ) -> Result<Vec<AnnotatedOffer>, ServiceError> {
        let offers = self.gpu.search_offers(filter).await?;
        let machine_ids: Vec<String> = offers.iter().map(|o| o.machine_id.clone()).collect();
        let annotations = self.history.annotate(&self.gpu_provider_name, &machine_ids);
        let by_machine: HashMap<&str, _> = annotations
            .iter()
            .map(|a| (a.machine_id.as_str(), a))
            .collect();

        let mut annotated = Vec::with_capacity(offers.len());
        for offer in offers {
            let Some(annotation) = by_machine.get(offer.machine_id.as_str()) else {
                continue;
            };
            if annotation.is_blacklisted && !include_blacklisted {
                continue;
            }
            annotated.push(AnnotatedOffer {
                is_blacklisted: annotation.is_blacklisted,
                blacklist_reason: annotation.blacklist_reason.clone(),
                success_rate: annotation.success_rate,
                total_attempts: annotation.total_attempts,
                reliability_status: annotation.reliability_status,
                offer,
            });
        }
        Ok(annotated)
    }

    /// Validate an offer is still usable before spending it: provider
    /// reachability, account balance for at least one hour, and offer
    /// availability, in that order (§4.9).
    ///
    /// # Errors
    /// Propagates a provider error from the balance lookup.
    pub async fn validate_before_create(&self, offer_id: &str) -> Result<ValidationResult, ServiceError> {
        let mut errors = Vec::new();

        let offers = match self.gpu.search_offers(&OfferFilter::default()).await {
            Ok(offers) => offers,
            Err(e) => {
                errors.push(format!("provider unreachable: {e}"));
                return Ok(ValidationResult {
                    valid: false,
                    errors,
                    warnings: Vec::new(),
                });
            }
        };

        let Some(offer) = offers.iter().find(|o| o.id == offer_id) else {
            errors.push(format!("offer {offer_id} is no longer available"));
            return Ok(ValidationResult {
                valid: false,
                errors,
                warnings: Vec::new(),
            });
        };

        let balance = self.gpu.get_balance().await?;
        let available = balance.credit + balance.balance;
        if available < offer.price_per_hour {
            errors.push(format!(
                "insufficient balance: have {available:.2}, need at least {:.2} for one hour",
                offer.price_per_hour
            ));
        }

        Ok(ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
        })
    }

    /// Create an instance from an offer, recording the attempt (success or
    /// failure) in the machine history store either way, and enqueuing
    /// standby provisioning as a background, best-effort task.
    ///
    /// # Errors
    /// Returns [`ServiceError::Validation`] if validation fails, or
    /// propagates the provider error on a failed create.
    pub async fn create_instance(
        &self,
        fleet_instance_id: i64,
        params: CreateInstanceParams,
        skip_validation: bool,
    ) -> Result<Instance, ServiceError> {
        if !skip_validation {
            let validation = self.validate_before_create(&params.offer_id).await?;
            if !validation.valid {
                return Err(ServiceError::Validation(validation.errors.join("; ")));
            }
        }

        info!(offer_id = %params.offer_id, "creating instance");
        let attempted_at = Utc::now();
        let result = self
            .gpu
            .create_instance(GpuCreateInstanceRequest {
                offer_id: params.offer_id.clone(),
                image: params.image.clone(),
                disk_gb: params.disk_gb,
                label: params.label.clone(),
                ports: params.ports.clone(),
                onstart: params.onstart.clone(),
            })
            .await;

        match result {
            Ok(instance) => {
                let time_to_ready_secs =
                    (Utc::now() - attempted_at).num_milliseconds() as f64 / 1000.0;
                let mut attempt =
                    CreationAttempt::success(self.gpu_provider_name.clone(), params.machine_id.clone());
                attempt.offer_id = Some(params.offer_id.clone());
                attempt.gpu_model = Some(params.gpu_model.clone());
                attempt.advertised_price = Some(params.price_per_hour);
                attempt.time_to_ready_secs = Some(time_to_ready_secs);
                attempt.instance_id = Some(instance.id.clone());
                self.history.record_attempt(attempt);

                self.events
                    .record(FleetEvent::InstanceLifecycle {
                        instance_id: fleet_instance_id,
                        action: "created".to_string(),
                        detail: HashMap::from([(
                            "gpu_instance_id".to_string(),
                            instance.id.clone(),
                        )]),
                        timestamp: Utc::now(),
                    })
                    .await;

                if let Some(standby) = self.standby.clone() {
                    let gpu_instance_id = instance.id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = standby.on_gpu_created(fleet_instance_id, &gpu_instance_id).await {
                            warn!(
                                error = %e,
                                gpu_instance_id = %gpu_instance_id,
                                "standby provisioning failed, instance remains usable without it"
                            );
                        }
                    });
                }

                info!(instance_id = %instance.id, "instance created");
                Ok(instance)
            }
            Err(e) => {
                let mut attempt = CreationAttempt::failure(
                    self.gpu_provider_name.clone(),
                    params.machine_id.clone(),
                    FailingStage::ApiError,
                    e.to_string(),
                );
                attempt.offer_id = Some(params.offer_id.clone());
                attempt.gpu_model = Some(params.gpu_model.clone());
                attempt.advertised_price = Some(params.price_per_hour);
                self.history.record_attempt(attempt);
                Err(ServiceError::from(e))
            }
        }
    }

    /// Destroy an instance. Destroy is idempotent over 404 at the provider
    /// layer (see [`gpu::GpuProvider::destroy`]); the standby association,
    /// if any, is handled per `reason` (§4.9).
    ///
    /// # Errors
    /// Propagates a provider error other than not-found.
    pub async fn destroy_instance(
        &self,
        fleet_instance_id: i64,
        gpu_instance_id: &str,
        destroy_standby: bool,
        reason: DestroyReason,
    ) -> Result<bool, ServiceError> {
        let destroyed = self.gpu.destroy(gpu_instance_id).await?;

        if let Some(standby) = &self.standby {
            match reason {
                DestroyReason::UserRequest if destroy_standby => {
                    if let Err(e) = standby.on_gpu_destroyed(gpu_instance_id).await {
                        warn!(error = %e, gpu_instance_id, "failed to tear down standby association");
                    }
                }
                DestroyReason::UserRequest => {}
                DestroyReason::GpuFailure => {
                    if let Err(e) = standby
                        .mark_gpu_failed(
                            gpu_instance_id,
                            FailureReason::External("gpu destroyed after failure".to_string()),
                        )
                        .await
                    {
                        warn!(error = %e, gpu_instance_id, "failed to mark standby association failed over");
                    }
                }
                DestroyReason::SpotInterruption => {
                    if let Err(e) = standby
                        .mark_gpu_failed(gpu_instance_id, FailureReason::SpotInterruption)
                        .await
                    {
                        warn!(error = %e, gpu_instance_id, "failed to mark standby association failed over");
                    }
                }
            }
        }

        self.events
            .record(FleetEvent::InstanceLifecycle {
                instance_id: fleet_instance_id,
                action: "destroyed".to_string(),
                detail: HashMap::from([("reason".to_string(), format!("{reason:?}"))]),
                timestamp: Utc::now(),
            })
            .await;

        Ok(destroyed)
    }

    /// # Errors
    /// Propagates a provider error.
    pub async fn pause_instance(
        &self,
        fleet_instance_id: i64,
        gpu_instance_id: &str,
    ) -> Result<bool, ServiceError> {
        let paused = self.gpu.pause(gpu_instance_id).await?;
        self.events
            .record(FleetEvent::InstanceLifecycle {
                instance_id: fleet_instance_id,
                action: "paused".to_string(),
                detail: HashMap::new(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(paused)
    }

    /// # Errors
    /// Propagates a provider error.
    pub async fn resume_instance(
        &self,
        fleet_instance_id: i64,
        gpu_instance_id: &str,
    ) -> Result<bool, ServiceError> {
        let resumed = self.gpu.resume(gpu_instance_id).await?;
        self.events
            .record(FleetEvent::InstanceLifecycle {
                instance_id: fleet_instance_id,
                action: "resumed".to_string(),
                detail: HashMap::new(),
                timestamp: Utc::now(),
            })
            .await;
        Ok(resumed)
    }

    /// Relocate a running instance onto a new offer: snapshot the source's
    /// working directory, create the new instance, restore onto it, and
    /// optionally destroy the source (§4.9).
    ///
    /// # Errors
    /// Returns [`ServiceError::SnapshotNotConfigured`] if no snapshot
    /// engine was supplied, or propagates a provider/snapshot error.
    pub async fn migrate_instance(
        &self,
        fleet_instance_id: i64,
        params: MigrateParams,
    ) -> Result<MigrateOutcome, ServiceError> {
        let snapshot = self
            .snapshot
            .as_ref()
            .ok_or(ServiceError::SnapshotNotConfigured)?;

        let tags = vec!["migration".to_string(), params.source_instance_id.clone()];
        let summary = snapshot
            .create(
                &params.source_shell_host,
                params.source_shell_port,
                &params.source_path,
                &tags,
            )
            .await?;

        let new_instance = self
            .gpu
            .create_instance(GpuCreateInstanceRequest {
                offer_id: params.target_offer_id.clone(),
                image: params.target_image.clone(),
                disk_gb: params.target_disk_gb,
                label: Some(format!("migrated-from-{}", params.source_instance_id)),
                ports: Vec::new(),
                onstart: None,
            })
            .await?;

        let ready = self
            .gpu
            .wait_ready(&new_instance.id, params.ready_timeout_secs)
            .await?;
        let target_host = ready
            .ssh_host
            .clone()
            .ok_or_else(|| ServiceError::ServiceUnavailable("migrated instance has no shell host".to_string()))?;
        let target_port = ready.ssh_port.unwrap_or(22);

        snapshot
            .restore(
                &target_host,
                target_port,
                &summary.snapshot_id,
                &params.target_path,
                true,
            )
            .await?;

        let source_destroyed = if params.destroy_source {
            self.gpu.destroy(&params.source_instance_id).await?
        } else {
            false
        };

        self.events
            .record(FleetEvent::InstanceLifecycle {
                instance_id: fleet_instance_id,
                action: "migrated".to_string(),
                detail: HashMap::from([
                    ("new_instance_id".to_string(), new_instance.id.clone()),
                    ("snapshot_id".to_string(), summary.snapshot_id.clone()),
                ]),
                timestamp: Utc::now(),
            })
            .await;

        Ok(MigrateOutcome {
            new_instance_id: new_instance.id,
            snapshot_id: summary.snapshot_id,
            source_destroyed,
        })
    }
}

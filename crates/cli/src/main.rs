//! Fleet CLI - local operator entry point wiring every control-plane
//! component into one process: providers, machine history, standby
//! pairing, serverless scheduling, and the instance service/agent
//! ingress façade over them.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::FleetConfig;
use events::{EventBus, TracingSink};
use gpu::{vast::VastProvider, GpuProvider, OfferFilter};
use history::MachineHistoryStore;
use region::Resolver;
use scheduler::{Scheduler, SchedulerConfig, ServerlessMode};
use service::{AgentHeartbeat, AgentIngress, CreateInstanceParams, DestroyReason, InstanceService};
use snapshot::{RepositoryCredentials, SnapshotEngine, SshTransport};
use standby::{RsyncTransport, StandbyConfig, StandbyManager};

/// Fleet CLI - manage GPU spot instances, standby pairing, and serverless scheduling.
#[derive(Parser)]
#[command(name = "fleet")]
#[command(about = "Local operator CLI for the fleet control plane")]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for purchasable GPU offers, annotated with machine history.
    Search {
        #[arg(long)]
        max_price: Option<f64>,
        #[arg(long)]
        num_gpus: Option<u32>,
        #[arg(long, default_value = "false")]
        verified_only: bool,
        #[arg(long, default_value = "20")]
        limit: u32,
        /// Include offers on blacklisted machines.
        #[arg(long, default_value = "false")]
        include_blacklisted: bool,
    },

    /// Validate an offer is still creatable (reachability, balance, availability).
    Validate {
        #[arg(long)]
        offer: String,
    },

    /// Create an instance from an offer, annotated with a fleet-assigned id.
    Create {
        #[arg(long)]
        fleet_instance_id: i64,
        #[arg(long)]
        offer: String,
        #[arg(long)]
        machine_id: String,
        #[arg(long)]
        gpu_model: String,
        #[arg(long)]
        price_per_hour: f64,
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "50")]
        disk_gb: u32,
        #[arg(long)]
        label: Option<String>,
        /// Skip the pre-create validation pass.
        #[arg(long, default_value = "false")]
        skip_validation: bool,
    },

    /// Destroy an instance.
    Destroy {
        #[arg(long)]
        fleet_instance_id: i64,
        #[arg(long)]
        gpu_instance_id: String,
        #[arg(long, default_value = "true")]
        destroy_standby: bool,
        /// Why the instance is being destroyed: user-request, gpu-failure, spot-interruption.
        #[arg(long, default_value = "user-request")]
        reason: DestroyReasonArg,
    },

    /// Pause a running instance.
    Pause {
        #[arg(long)]
        fleet_instance_id: i64,
        #[arg(long)]
        gpu_instance_id: String,
    },

    /// Resume a paused instance.
    Resume {
        #[arg(long)]
        fleet_instance_id: i64,
        #[arg(long)]
        gpu_instance_id: String,
    },

    /// Enable standby pairing for the fleet (applies before any `create`).
    StandbyEnable {
        /// CPU zone override; resolved from the offer's region when absent.
        #[arg(long)]
        zone: Option<String>,
    },

    /// Show standby manager status.
    StandbyStatus,

    /// Enable serverless (auto-pause/resume) management for an instance.
    SchedulerEnable {
        #[arg(long)]
        fleet_instance_id: i64,
        #[arg(long)]
        gpu_instance_id: String,
        #[arg(long, default_value = "economic")]
        mode: ServerlessModeArg,
        #[arg(long)]
        gpu_rate_per_hour: f64,
        #[arg(long)]
        idle_rate_per_hour: f64,
    },

    /// Disable serverless management for an instance.
    SchedulerDisable {
        #[arg(long)]
        fleet_instance_id: i64,
    },

    /// Show serverless scheduler status.
    SchedulerStatus,

    /// Simulate an in-guest agent heartbeat against the ingress path.
    Heartbeat {
        #[arg(long)]
        instance_id: String,
        #[arg(long, default_value = "running")]
        status: String,
        #[arg(long)]
        gpu_utilization: Option<f64>,
    },

    /// Run the background loops (scale-down, auto-destroy, sync, health,
    /// recovery) until interrupted. Every one-shot subcommand above also
    /// starts these loops for its own duration; `serve` is for standing
    /// the control plane up on its own, e.g. behind a façade.
    Serve,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DestroyReasonArg {
    UserRequest,
    GpuFailure,
    SpotInterruption,
}

impl From<DestroyReasonArg> for DestroyReason {
    fn from(arg: DestroyReasonArg) -> Self {
        match arg {
            DestroyReasonArg::UserRequest => DestroyReason::UserRequest,
            DestroyReasonArg::GpuFailure => DestroyReason::GpuFailure,
            DestroyReasonArg::SpotInterruption => DestroyReason::SpotInterruption,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ServerlessModeArg {
    Fast,
    Economic,
    Spot,
}

impl From<ServerlessModeArg> for ServerlessMode {
    fn from(arg: ServerlessModeArg) -> Self {
        match arg {
            ServerlessModeArg::Fast => ServerlessMode::Fast,
            ServerlessModeArg::Economic => ServerlessMode::Economic,
            ServerlessModeArg::Spot => ServerlessMode::Spot,
        }
    }
}

/// Everything built once at startup and shared across subcommands.
struct Fleet {
    instance_service: InstanceService,
    standby: Arc<StandbyManager>,
    scheduler: Arc<Scheduler>,
    agent_ingress: AgentIngress,
}

async fn build(cfg: &FleetConfig) -> Result<Fleet> {
    let events = Arc::new(EventBus::with_sinks(vec![Arc::new(TracingSink::new())]));

    let gpu_provider: Arc<dyn GpuProvider> = Arc::new(
        VastProvider::with_base_url(&cfg.gpu_provider_api_key, &cfg.gpu_provider_base_url)
            .context("failed to construct GPU provider")?,
    );
    let cpu_provider = Arc::new(
        cpu::gcp::GcpProvider::from_key_path(&cfg.cpu_service_account_path)
            .context("failed to construct CPU provider")?,
    );
    let history = Arc::new(MachineHistoryStore::new());
    let resolver = Arc::new(Resolver::new());

    let snapshot = if cfg.has_object_store() {
        let transport = Arc::new(SshTransport::default());
        let credentials = RepositoryCredentials::new(
            format!("s3:{}/{}", cfg.object_store_endpoint, cfg.object_store_bucket),
            cfg.object_store_secret_key.clone(),
            cfg.object_store_access_key.clone(),
            cfg.object_store_secret_key.clone(),
        );
        Some(Arc::new(SnapshotEngine::new(transport, credentials)))
    } else {
        None
    };

    let standby = Arc::new(StandbyManager::new(
        gpu_provider.clone(),
        cpu_provider,
        resolver,
        history.clone(),
        events.clone(),
        Arc::new(RsyncTransport::new("root", 10)),
        "vast",
    ));

    let checkpoint = if cfg.has_object_store() {
        Some(Arc::new(checkpoint::CheckpointEngine::new(Arc::new(
            checkpoint::SshTransport::default(),
        ))))
    } else {
        None
    };
    let fallback_strategies: Vec<Arc<dyn scheduler::FallbackStrategy>> = vec![
        Arc::new(scheduler::SnapshotFallbackStrategy::new(gpu_provider.clone(), 50)),
        Arc::new(scheduler::DiskMigrationFallbackStrategy::new(gpu_provider.clone(), 50)),
    ];
    let scheduler = Arc::new(Scheduler::new(
        gpu_provider.clone(),
        checkpoint,
        events.clone(),
        fallback_strategies,
        SchedulerConfig::default(),
    ));
    scheduler.start().await;

    let instance_service =
        InstanceService::new(gpu_provider, history, Some(standby.clone()), snapshot, events, "vast");

    // Hibernate after roughly ten missed-utilization heartbeats, so the
    // window scales with how often agents are configured to check in.
    const DEFAULT_GPU_IDLE_THRESHOLD: f64 = 5.0;
    let agent_ingress = AgentIngress::new(
        Some(scheduler.clone()),
        DEFAULT_GPU_IDLE_THRESHOLD,
        std::time::Duration::from_secs(cfg.agent_sync_interval_secs * 10),
    );

    Ok(Fleet {
        instance_service,
        standby,
        scheduler,
        agent_ingress,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = FleetConfig::from_env().context("failed to load fleet configuration")?;
    let fleet = build(&cfg).await?;

    match cli.command {
        Commands::Search {
            max_price,
            num_gpus,
            verified_only,
            limit,
            include_blacklisted,
        } => {
            let filter = OfferFilter {
                max_price_per_hour: max_price,
                num_gpus,
                verified_only,
                limit,
                ..Default::default()
            };
            let offers = fleet
                .instance_service
                .search_offers(&filter, include_blacklisted)
                .await?;

            println!(
                "\n{:<10} {:<20} {:<8} {:<10} {:<12} {:<10}",
                "ID", "GPU", "COUNT", "$/HR", "RELIABLE", "SUCCESS%"
            );
            println!("{}", "-".repeat(75));
            for annotated in offers {
                println!(
                    "{:<10} {:<20} {:<8} {:<10.3} {:<12} {:<10}",
                    annotated.offer.id,
                    annotated.offer.specs.gpu_model,
                    annotated.offer.specs.gpu_count,
                    annotated.offer.price_per_hour,
                    if annotated.is_blacklisted { "no" } else { "yes" },
                    annotated
                        .success_rate
                        .map_or("n/a".to_string(), |r| format!("{:.0}", r * 100.0)),
                );
            }
            println!();
        }

        Commands::Validate { offer } => {
            let result = fleet.instance_service.validate_before_create(&offer).await?;
            if result.valid {
                println!("offer {offer} is valid");
            } else {
                println!("offer {offer} is NOT valid:");
                for error in &result.errors {
                    println!("  - {error}");
                }
            }
            for warning in &result.warnings {
                println!("warning: {warning}");
            }
        }

        Commands::Create {
            fleet_instance_id,
            offer,
            machine_id,
            gpu_model,
            price_per_hour,
            image,
            disk_gb,
            label,
            skip_validation,
        } => {
            info!(offer_id = %offer, "creating instance");
            let instance = fleet
                .instance_service
                .create_instance(
                    fleet_instance_id,
                    CreateInstanceParams {
                        offer_id: offer,
                        machine_id,
                        gpu_model,
                        price_per_hour,
                        image,
                        disk_gb,
                        label,
                        ports: Vec::new(),
                        onstart: None,
                    },
                    skip_validation,
                )
                .await?;

            println!("\nInstance created.");
            println!("  ID:     {}", instance.id);
            println!("  Status: {}", instance.status);
        }

        Commands::Destroy {
            fleet_instance_id,
            gpu_instance_id,
            destroy_standby,
            reason,
        } => {
            let destroyed = fleet
                .instance_service
                .destroy_instance(fleet_instance_id, &gpu_instance_id, destroy_standby, reason.into())
                .await?;
            println!("Instance {gpu_instance_id} destroyed: {destroyed}");
        }

        Commands::Pause {
            fleet_instance_id,
            gpu_instance_id,
        } => {
            fleet
                .instance_service
                .pause_instance(fleet_instance_id, &gpu_instance_id)
                .await?;
            println!("Instance {gpu_instance_id} paused.");
        }

        Commands::Resume {
            fleet_instance_id,
            gpu_instance_id,
        } => {
            fleet
                .instance_service
                .resume_instance(fleet_instance_id, &gpu_instance_id)
                .await?;
            println!("Instance {gpu_instance_id} resumed.");
        }

        Commands::StandbyEnable { zone } => {
            fleet
                .standby
                .configure(StandbyConfig {
                    auto_standby_enabled: true,
                    zone,
                    ..Default::default()
                })
                .await;
            println!("standby pairing enabled for future creates.");
        }

        Commands::StandbyStatus => {
            let status = fleet.standby.get_status().await;
            println!("{}", serde_json::to_string_pretty(&status_json(&status))?);
        }

        Commands::SchedulerEnable {
            fleet_instance_id,
            gpu_instance_id,
            mode,
            gpu_rate_per_hour,
            idle_rate_per_hour,
        } => {
            let binding = fleet
                .scheduler
                .enable(
                    fleet_instance_id,
                    gpu_instance_id,
                    mode.into(),
                    gpu_rate_per_hour,
                    idle_rate_per_hour,
                )
                .await?;
            println!("serverless enabled: mode={}", binding.mode);
        }

        Commands::SchedulerDisable { fleet_instance_id } => {
            fleet.scheduler.disable(fleet_instance_id).await?;
            println!("serverless disabled for instance {fleet_instance_id}.");
        }

        Commands::SchedulerStatus => {
            let status = fleet.scheduler.get_status().await;
            println!(
                "running={} bindings={} paused={}",
                status.running_count, status.binding_count, status.paused_count
            );
        }

        Commands::Heartbeat {
            instance_id,
            status,
            gpu_utilization,
        } => {
            let response = fleet
                .agent_ingress
                .receive_status(AgentHeartbeat {
                    agent: "fleet-agent".to_string(),
                    version: "1.0".to_string(),
                    instance_id,
                    status,
                    message: None,
                    last_backup: None,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    uptime: None,
                    gpu_metrics: None,
                    gpu_utilization,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Commands::Serve => {
            info!("control plane running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            info!("received ctrl-c, shutting down");
        }
    }

    fleet.scheduler.stop().await;
    Ok(())
}

fn status_json(status: &standby::StandbyManagerStatus) -> serde_json::Value {
    serde_json::json!({
        "configured": status.configured,
        "auto_standby_enabled": status.auto_standby_enabled,
        "association_count": status.association_count,
        "failover_active_count": status.failover_active_count,
        "recovering_count": status.recovering_count,
    })
}

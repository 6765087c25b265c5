//! GPU CLI - inspect and manage spot GPU marketplace instances.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gpu::providers::vast::VastProvider;
use gpu::{CreateInstanceRequest, GpuProvider, OfferFilter};

/// GPU CLI - search offers and manage spot GPU instances.
#[derive(Parser)]
#[command(name = "gpu")]
#[command(about = "Search and manage spot GPU marketplace instances")]
struct Cli {
    /// GPU marketplace API key (or set `GPU_PROVIDER_API_KEY` env var).
    #[arg(long, env = "GPU_PROVIDER_API_KEY")]
    api_key: String,

    /// GPU marketplace base URL.
    #[arg(long, env = "GPU_PROVIDER_BASE_URL")]
    base_url: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for purchasable offers.
    Search {
        /// Maximum hourly price in USD.
        #[arg(long)]
        max_price: Option<f64>,

        /// Minimum GPU count.
        #[arg(long)]
        num_gpus: Option<u32>,

        /// Only offers on verified hosts.
        #[arg(long, default_value = "false")]
        verified_only: bool,

        /// Maximum number of offers to return.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// List all instances on this account.
    List,

    /// Create a new instance from a consumed offer.
    Create {
        /// Offer id (from `search`).
        #[arg(long)]
        offer: String,

        /// Container image to launch.
        #[arg(long)]
        image: String,

        /// Disk size in GB.
        #[arg(long, default_value = "50")]
        disk: u32,

        /// Optional label.
        #[arg(long)]
        label: Option<String>,
    },

    /// Get details of an instance.
    Get {
        /// Instance id.
        #[arg(long)]
        id: String,
    },

    /// Destroy an instance.
    Destroy {
        /// Instance id.
        #[arg(long)]
        id: String,

        /// Skip confirmation prompt.
        #[arg(long, short = 'y', default_value = "false")]
        yes: bool,
    },

    /// Pause a running instance.
    Pause {
        /// Instance id.
        #[arg(long)]
        id: String,
    },

    /// Resume a paused instance.
    Resume {
        /// Instance id.
        #[arg(long)]
        id: String,
    },

    /// Show account balance.
    Balance,

    /// Wait for an instance to be ready.
    Wait {
        /// Instance id.
        #[arg(long)]
        id: String,

        /// Timeout in seconds.
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
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

    let provider = match &cli.base_url {
        Some(url) => VastProvider::with_base_url(&cli.api_key, url),
        None => VastProvider::new(&cli.api_key),
    }
    .context("failed to construct GPU provider")?;

    match cli.command {
        Commands::Search {
            max_price,
            num_gpus,
            verified_only,
            limit,
        } => {
            let filter = OfferFilter {
                max_price_per_hour: max_price,
                num_gpus,
                verified_only,
                limit,
                ..Default::default()
            };
            let offers = provider.search_offers(&filter).await?;

            println!(
                "\n{:<10} {:<20} {:<8} {:<10} {:<10}",
                "ID", "GPU", "COUNT", "$/HR", "RELIABILITY"
            );
            println!("{}", "-".repeat(65));
            for offer in offers {
                println!(
                    "{:<10} {:<20} {:<8} {:<10.3} {:<10.2}",
                    offer.id,
                    offer.specs.gpu_model,
                    offer.specs.gpu_count,
                    offer.price_per_hour,
                    offer.reliability
                );
            }
            println!();
        }

        Commands::List => {
            let instances = provider.list_instances().await?;

            println!(
                "\n{:<10} {:<12} {:<20} {:<10}",
                "ID", "STATUS", "GPU", "$/HR"
            );
            println!("{}", "-".repeat(60));
            for instance in instances {
                println!(
                    "{:<10} {:<12} {:<20} {:<10.3}",
                    instance.id, instance.status, instance.specs.gpu_model, instance.dph_total
                );
            }
            println!();
        }

        Commands::Create {
            offer,
            image,
            disk,
            label,
        } => {
            info!(offer_id = %offer, image = %image, "creating instance");

            let instance = provider
                .create_instance(CreateInstanceRequest {
                    offer_id: offer,
                    image,
                    disk_gb: disk,
                    label,
                    ports: vec![],
                    onstart: None,
                })
                .await?;

            println!("\nInstance created.");
            println!("  ID:     {}", instance.id);
            println!("  Status: {}", instance.status);
            println!(
                "\nRun `gpu wait --id {}` to wait for it to come up.",
                instance.id
            );
        }

        Commands::Get { id } => {
            let instance = provider.get_instance(&id).await?;

            println!("\nInstance: {}", instance.id);
            println!("  Status:      {}", instance.status);
            println!(
                "  GPU:         {} x{}",
                instance.specs.gpu_model, instance.specs.gpu_count
            );
            println!("  $/hr:        {:.3}", instance.dph_total);

            if let Some(host) = &instance.ssh_host {
                let port = instance.ssh_port.unwrap_or(22);
                println!("  SSH:         {host}:{port}");
            }

            if let Some(created) = &instance.created_at {
                println!("  Created:     {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }

        Commands::Destroy { id, yes } => {
            if !yes {
                println!("Destroy instance {id}? This cannot be undone.");
                println!("Use --yes to skip this prompt.");
                return Ok(());
            }

            info!(instance_id = %id, "destroying instance");
            provider.destroy(&id).await?;
            println!("\nInstance {id} destroyed.");
        }

        Commands::Pause { id } => {
            provider.pause(&id).await?;
            println!("Instance {id} paused.");
        }

        Commands::Resume { id } => {
            provider.resume(&id).await?;
            println!("Instance {id} resumed.");
        }

        Commands::Balance => {
            let balance = provider.get_balance().await?;
            println!("\nCredit:  ${:.2}", balance.credit);
            println!("Balance: ${:.2}", balance.balance);
        }

        Commands::Wait { id, timeout } => {
            println!("Waiting for instance {id} to be ready...");
            let instance = provider.wait_ready(&id, timeout).await?;
            println!("\nInstance ready.");
            if let Some(host) = &instance.ssh_host {
                let port = instance.ssh_port.unwrap_or(22);
                println!("  SSH: ssh -p {port} root@{host}");
            }
        }
    }

    Ok(())
}

//! CPU CLI - inspect and manage stable-cloud standby VMs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cpu::gcp::GcpProvider;
use cpu::{CpuProvider, CreateInstanceRequest};

/// CPU CLI - create and manage stable-cloud standby VMs.
#[derive(Parser)]
#[command(name = "cpu")]
#[command(about = "Manage stable-cloud CPU standby VMs")]
struct Cli {
    /// Path to the stable-cloud service-account JSON credentials.
    #[arg(long, env = "CPU_SERVICE_ACCOUNT_PATH")]
    service_account: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new standby VM.
    Create {
        /// Instance name.
        #[arg(long)]
        name: String,

        /// Zone to create the VM in.
        #[arg(long)]
        zone: String,

        /// Machine type.
        #[arg(long, default_value = "e2-medium")]
        machine_type: String,

        /// Boot disk size in GB.
        #[arg(long, default_value = "100")]
        disk_gb: u32,

        /// Request a spot/preemptible VM.
        #[arg(long, default_value = "true")]
        spot: bool,
    },

    /// Get details of an instance.
    Get {
        /// Instance name.
        #[arg(long)]
        name: String,

        /// Zone the instance runs in.
        #[arg(long)]
        zone: String,
    },

    /// List instances, optionally scoped to one zone.
    List {
        /// Zone to list (all zones when omitted).
        #[arg(long)]
        zone: Option<String>,
    },

    /// Start a stopped instance.
    Start {
        #[arg(long)]
        name: String,
        #[arg(long)]
        zone: String,
    },

    /// Stop a running instance without destroying it.
    Stop {
        #[arg(long)]
        name: String,
        #[arg(long)]
        zone: String,
    },

    /// Destroy an instance.
    Destroy {
        #[arg(long)]
        name: String,
        #[arg(long)]
        zone: String,

        /// Skip confirmation prompt.
        #[arg(long, short = 'y', default_value = "false")]
        yes: bool,
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

    let provider =
        GcpProvider::from_key_path(&cli.service_account).context("failed to load credentials")?;

    match cli.command {
        Commands::Create {
            name,
            zone,
            machine_type,
            disk_gb,
            spot,
        } => {
            info!(%name, %zone, "creating standby VM");
            let instance = provider
                .create_instance(CreateInstanceRequest {
                    name,
                    zone,
                    machine_type,
                    disk_size_gb: disk_gb,
                    spot,
                    labels: vec![],
                    ssh_public_key: None,
                    startup_script: None,
                })
                .await?;

            println!("\nInstance created.");
            println!("  Name:   {}", instance.name);
            println!("  Status: {}", instance.status);
            if let Some(ip) = &instance.external_ip {
                println!("  IP:     {ip}");
            }
        }

        Commands::Get { name, zone } => {
            let instance = provider.get_instance(&name, &zone).await?;
            println!("\nInstance: {}", instance.name);
            println!("  Status: {}", instance.status);
            println!("  Zone:   {}", instance.zone);
            if let Some(ip) = &instance.external_ip {
                println!("  IP:     {ip}");
            }
        }

        Commands::List { zone } => {
            let instances = provider.list_instances(zone.as_deref()).await?;
            println!("\n{:<24} {:<16} {:<20} {:<16}", "NAME", "ZONE", "STATUS", "IP");
            println!("{}", "-".repeat(80));
            for instance in instances {
                println!(
                    "{:<24} {:<16} {:<20} {:<16}",
                    instance.name,
                    instance.zone,
                    instance.status,
                    instance.external_ip.as_deref().unwrap_or("-")
                );
            }
            println!();
        }

        Commands::Start { name, zone } => {
            provider.start(&name, &zone).await?;
            println!("Instance {name} starting.");
        }

        Commands::Stop { name, zone } => {
            provider.stop(&name, &zone).await?;
            println!("Instance {name} stopping.");
        }

        Commands::Destroy { name, zone, yes } => {
            if !yes {
                println!("Destroy instance {name}? This cannot be undone.");
                println!("Use --yes to skip this prompt.");
                return Ok(());
            }
            provider.destroy(&name, &zone).await?;
            println!("\nInstance {name} destroyed.");
        }
    }

    Ok(())
}

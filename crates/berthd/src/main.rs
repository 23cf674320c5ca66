//! berthd: the berth daemon CLI.
//!
//! Assembles the berth subsystems over one state store:
//! - State store (redb)
//! - Host inventory
//! - Simulated compute agent
//! - Lifecycle coordinator
//!
//! # Usage
//!
//! ```text
//! berthd --data-dir /var/lib/berth host add host1 --vcpus 8 --memory-mb 16384
//! berthd instance build vm-1 --flavor m1.small --vcpus 1 --memory-mb 2048 --image cirros
//! berthd instance resize vm-1 --flavor m1.large --vcpus 2 --memory-mb 4096
//! berthd host force-down host2
//! berthd instance evacuate vm-1
//! berthd scenario
//! ```

mod commands;
mod scenario;
mod stack;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::debug;

use berth_core::BerthConfig;
use berth_state::{ConstraintSet, Flavor, ResourceShape};

#[derive(Parser)]
#[command(
    name = "berthd",
    about = "berth: instance placement and lifecycle",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to berth.toml.
    #[arg(long, global = true, default_value = "berth.toml")]
    config: PathBuf,

    /// Data directory; overrides `store.path` from the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs and results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage compute hosts.
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Run lifecycle operations on instances.
    Instance {
        #[command(subcommand)]
        action: InstanceAction,
    },
    /// Replay the resize then evacuate regression on a throwaway in-memory store.
    Scenario,
}

#[derive(Subcommand)]
enum HostAction {
    /// Register a host (or update its capacity and aggregates).
    Add {
        id: String,
        #[command(flatten)]
        capacity: ShapeArgs,
        /// Aggregate the host belongs to (repeatable).
        #[arg(long = "aggregate")]
        aggregates: Vec<String>,
    },
    Remove {
        id: String,
    },
    List,
    /// Mark a host unreachable.
    ForceDown {
        id: String,
    },
    /// Return a forced-down host to service.
    ForceUp {
        id: String,
    },
}

#[derive(Subcommand)]
enum InstanceAction {
    Build {
        id: String,
        #[command(flatten)]
        flavor: FlavorArgs,
        #[arg(long)]
        image: String,
        /// Land on this host.
        #[arg(long)]
        host: Option<String>,
        #[command(flatten)]
        constraints: ConstraintArgs,
    },
    Resize {
        id: String,
        #[command(flatten)]
        flavor: FlavorArgs,
    },
    /// Cold migrate.
    Migrate {
        id: String,
        #[arg(long)]
        host: Option<String>,
    },
    LiveMigrate {
        id: String,
        #[arg(long)]
        host: Option<String>,
    },
    /// Rebuild elsewhere after the instance's host went down.
    Evacuate {
        id: String,
        #[arg(long)]
        host: Option<String>,
    },
    /// Shelve and offload from its host.
    Shelve {
        id: String,
    },
    Unshelve {
        id: String,
        #[arg(long)]
        host: Option<String>,
    },
    ConfirmResize {
        id: String,
    },
    RevertResize {
        id: String,
    },
    Delete {
        id: String,
    },
    /// Show the placement record, lifecycle state, last fault and operation log.
    Show {
        id: String,
    },
    /// Replace the durable constraint set (an empty set clears it).
    SetConstraints {
        id: String,
        #[command(flatten)]
        constraints: ConstraintArgs,
    },
}

#[derive(Args)]
struct ShapeArgs {
    #[arg(long)]
    vcpus: u32,
    #[arg(long)]
    memory_mb: u64,
    #[arg(long, default_value = "20")]
    disk_gb: u64,
}

impl ShapeArgs {
    fn shape(&self) -> ResourceShape {
        ResourceShape::new(self.vcpus, self.memory_mb, self.disk_gb)
    }
}

#[derive(Args)]
struct FlavorArgs {
    /// Flavor name.
    #[arg(long = "flavor")]
    name: String,
    #[command(flatten)]
    shape: ShapeArgs,
}

impl FlavorArgs {
    fn flavor(&self) -> Flavor {
        Flavor::new(self.name.clone(), self.shape.shape())
    }
}

#[derive(Args)]
struct ConstraintArgs {
    #[arg(long = "exclude-host")]
    exclude_hosts: Vec<String>,
    #[arg(long = "require-host")]
    require_hosts: Vec<String>,
    #[arg(long = "exclude-aggregate")]
    exclude_aggregates: Vec<String>,
    #[arg(long = "require-aggregate")]
    require_aggregates: Vec<String>,
}

impl ConstraintArgs {
    fn constraint_set(&self) -> ConstraintSet {
        ConstraintSet {
            excluded_hosts: self.exclude_hosts.iter().cloned().collect(),
            required_hosts: self.require_hosts.iter().cloned().collect(),
            excluded_aggregates: self.exclude_aggregates.iter().cloned().collect(),
            required_aggregates: self.require_aggregates.iter().cloned().collect(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = BerthConfig::load_or_default(&cli.config)?;
    debug!(config = ?cli.config, "configuration loaded");

    match cli.command {
        Command::Scenario => scenario::run(&config.scheduler, cli.json).await,
        Command::Host { action } => {
            let stack = stack::Stack::open(&config, cli.data_dir.as_deref())?;
            commands::host(&stack, action, cli.json).await
        }
        Command::Instance { action } => {
            let stack = stack::Stack::open(&config, cli.data_dir.as_deref())?;
            commands::instance(&stack, action, cli.json).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,berthd=debug,berth=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

//! Cluster State - Coordination Layer for Clustered Application Nodes
//!
//! Command line tool to prepare and check node configuration, and to run a
//! local simulation of a cluster on the in-process substrate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clusterstate::config::{ClusterStateConfig, LoggingConfig};
use clusterstate::coordinator::ClusterCoordinator;
use clusterstate::error::Result;
use clusterstate::node::NodeRole;
use clusterstate::process::ProcessId;
use clusterstate::substrate::{MemoryGroup, GROUP_NAME};

/// Cluster State - Coordination Layer for Clustered Application Nodes
#[derive(Parser)]
#[command(name = "clusterstate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value_os_t = ClusterStateConfig::default_path())]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value_os_t = ClusterStateConfig::default_path())]
        output: PathBuf,

        /// Node display name
        #[arg(long, default_value = "node-1")]
        node_name: String,

        /// Create a search node configuration instead of an application one
        #[arg(long)]
        search: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show node attributes and join settings as JSON
    Info,

    /// Run a cluster of in-process nodes and walk it through election and departure
    Simulate {
        /// Number of application nodes
        #[arg(short, long, default_value_t = 3)]
        nodes: usize,

        /// Number of search nodes
        #[arg(short, long, default_value_t = 1)]
        search_nodes: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The config may not exist yet (init), fall back to defaults
    let logging = ClusterStateConfig::from_file(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref().unwrap_or(&logging.level), &logging);

    match cli.command {
        Commands::Init {
            output,
            node_name,
            search,
        } => run_init(output, node_name, search),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
        Commands::Simulate {
            nodes,
            search_nodes,
        } => run_simulate(cli.config, nodes, search_nodes).await,
    }
}

/// Initialize logging
fn init_logging(level: &str, logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Write a starter configuration file
fn run_init(output: PathBuf, node_name: String, search: bool) -> Result<()> {
    let role = if search {
        NodeRole::Search
    } else {
        NodeRole::Application
    };
    let config = ClusterStateConfig::sample(&node_name, role);
    config.write_to(&output)?;

    println!("Configuration written to {}", output.display());
    println!("Edit cluster.name and cluster.hosts before starting the node.");
    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    match ClusterStateConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node:    {} ({})", config.node.name, config.node.role);
            println!("  Cluster: {}", config.cluster.name);
            println!(
                "  Port:    {} (+{} tries)",
                config.cluster.port, config.cluster.port_try_count
            );
            println!("  Peers:   {}", config.cluster.hosts.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = ClusterStateConfig::from_file(&config_path)?;
    let settings = config.join_settings()?;

    let info = serde_json::json!({
        "cluster": config.cluster.name,
        "group": settings.group_name,
        "attributes": settings.attributes,
        "port": settings.port,
        "port_try_count": settings.port_try_count,
        "interfaces": settings.interfaces,
        "peers": settings.peers.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

/// Run a local cluster on the in-process substrate
async fn run_simulate(config_path: PathBuf, nodes: usize, search_nodes: usize) -> Result<()> {
    let base = ClusterStateConfig::from_file(&config_path)?;
    let version = env!("CARGO_PKG_VERSION");
    let group = MemoryGroup::new(GROUP_NAME);

    tracing::info!(
        "Simulating cluster {} with {} application and {} search node(s)",
        base.cluster.name,
        nodes,
        search_nodes
    );

    let mut coordinators = Vec::new();
    for i in 0..nodes + search_nodes {
        let role = if i < nodes {
            NodeRole::Application
        } else {
            NodeRole::Search
        };

        let mut config = base.clone();
        config.node.name = format!("{}-{}", role, i + 1);
        config.node.host = Some(config.node.name.clone());
        config.node.role = role;

        let coordinator = ClusterCoordinator::create(&config, &group).await?;
        coordinator.register_cluster_name(&config.cluster.name).await?;
        if role == NodeRole::Application {
            coordinator.register_version(version).await?;
        }

        let name = config.node.name.clone();
        coordinator
            .add_listener(move |p: ProcessId| {
                tracing::info!("[{}] process {} is operational in the cluster", name, p);
            })
            .await;

        tracing::info!(
            "{} joined on {}",
            config.node.name,
            coordinator.local_endpoint()
        );
        coordinators.push((role, Arc::new(coordinator)));
    }

    // Every application node races for leadership
    let mut contenders = Vec::new();
    for (role, coordinator) in &coordinators {
        if *role == NodeRole::Application {
            let coordinator = Arc::clone(coordinator);
            contenders.push(tokio::spawn(async move {
                let won = coordinator.try_lock_leader().await?;
                Ok::<_, clusterstate::Error>((won, coordinator))
            }));
        }
    }

    let mut leader = None;
    for contender in futures::future::join_all(contenders).await {
        let (won, coordinator) =
            contender.map_err(|e| clusterstate::Error::Internal(e.to_string()))??;
        if won {
            leader = Some(coordinator);
        }
    }

    if let Some(leader) = &leader {
        leader.set_operational(ProcessId::Web).await?;
        leader.set_operational(ProcessId::ComputeEngine).await?;
    }
    for (role, coordinator) in &coordinators {
        if *role == NodeRole::Search {
            coordinator.set_operational(ProcessId::Search).await?;
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Some((_, observer)) = coordinators.last() {
        report(observer).await;
    }

    if let Some(leader) = leader {
        tracing::info!("Leader {} leaves the cluster", leader.local_endpoint());
        leader.close().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        if let Some((_, observer)) = coordinators
            .iter()
            .find(|(_, c)| !Arc::ptr_eq(c, &leader))
        {
            report(observer).await;
            if observer.try_lock_leader().await? {
                tracing::info!("{} took over leadership", observer.local_endpoint());
            } else {
                tracing::info!(
                    "Leadership stays with the departed leader until no application node is left"
                );
            }
        }
    }

    for (_, coordinator) in &coordinators {
        coordinator.close().await;
    }
    tracing::info!("Simulation finished");
    Ok(())
}

/// Log the cluster as seen from one node
async fn report(observer: &ClusterCoordinator) {
    let members = observer.members().await;
    let leader = observer.leader_host_name().await;
    let version = observer.version().await;
    tracing::info!(
        "Seen from {}: members {:?}, leader {:?}, version {:?}",
        observer.local_endpoint(),
        members,
        leader,
        version
    );
    for process in ProcessId::ALL {
        let operational = observer.is_operational(process).await;
        tracing::info!("  {:<6} operational: {}", process.key(), operational);
    }
}

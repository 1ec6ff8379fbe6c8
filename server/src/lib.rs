//! # gp
//!
//! One binary for every role in a cluster:
//!
//! - `gp hub` - run the hub on the coordinator host
//! - `gp agent` - run the agent on a segment host
//! - `gp init cluster <file>` - create a cluster from an input file
//! - `gp start|stop|status|dial agents` - manage the agents through the hub
//! - `gp stop hub` - shut the hub down
//!
//! The configuration file defaults to `$GPHOME/gp.conf`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gpctl_agent::{AgentService, LocalSystem};
use gpctl_client::{check_open_file_limit, format_statuses, HubClient, InputFile, StreamRenderer};
use gpctl_cluster::HubService;
use gpctl_common::{AgentConfig, HubConfig, ProcessRunner, CONFIG_FILE_NAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "gp")]
#[command(author, version, about = "Cluster management for the database", long_about = None)]
pub struct Cli {
    /// Configuration file written at install time
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The explicit `--config-file`, else `$GPHOME/gp.conf`
    pub fn config_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config_file {
            return Ok(path.clone());
        }
        let gphome = std::env::var("GPHOME").context("GPHOME is not set and no --config-file was given")?;
        Ok(PathBuf::from(gphome).join(CONFIG_FILE_NAME))
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the hub
    Hub,
    /// Run the agent
    Agent,
    /// Initialize a cluster
    #[command(subcommand)]
    Init(InitCommand),
    /// Start services
    #[command(subcommand)]
    Start(ServiceCommand),
    /// Stop services
    #[command(subcommand)]
    Stop(StopCommand),
    /// Show service status
    #[command(subcommand)]
    Status(ServiceCommand),
    /// Reconnect the hub to running services
    #[command(subcommand)]
    Dial(ServiceCommand),
}

#[derive(Debug, Subcommand)]
pub enum InitCommand {
    /// Create a cluster from an input file
    Cluster(InitClusterArgs),
}

#[derive(Debug, Args)]
pub struct InitClusterArgs {
    /// Input file describing the coordinator, primaries and settings
    pub input_file: PathBuf,

    /// Remove existing data directories
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Subcommand)]
pub enum ServiceCommand {
    /// The agents on every host
    Agents,
}

#[derive(Debug, Subcommand)]
pub enum StopCommand {
    /// The agents on every host
    Agents,
    /// The hub
    Hub,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path()?;

    match cli.command {
        Commands::Hub => run_hub(config_path).await,
        Commands::Agent => run_agent(config_path).await,
        Commands::Init(InitCommand::Cluster(args)) => init_cluster(config_path, args).await,
        Commands::Start(ServiceCommand::Agents) => {
            hub_client(&config_path).await?.start_agents().await?;
            println!("Agents started");
            Ok(())
        }
        Commands::Status(ServiceCommand::Agents) => {
            let statuses = hub_client(&config_path).await?.status_agents().await?;
            print!("{}", format_statuses(&statuses));
            Ok(())
        }
        Commands::Dial(ServiceCommand::Agents) => {
            hub_client(&config_path).await?.dial_agents().await?;
            println!("Connected to agents");
            Ok(())
        }
        Commands::Stop(StopCommand::Agents) => {
            hub_client(&config_path).await?.stop_agents().await?;
            println!("Agents stopped");
            Ok(())
        }
        Commands::Stop(StopCommand::Hub) => {
            hub_client(&config_path).await?.stop_hub().await?;
            println!("Hub stopped");
            Ok(())
        }
    }
}

async fn hub_client(config_path: &Path) -> Result<HubClient> {
    let config = HubConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    Ok(HubClient::connect(&config).await?)
}

async fn run_hub(config_path: PathBuf) -> Result<()> {
    let config = HubConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!("Starting hub for {} hosts", config.hostnames.len());

    HubService::from_config(config, config_path)?.serve().await?;
    Ok(())
}

async fn run_agent(config_path: PathBuf) -> Result<()> {
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!("Starting agent on port {}", config.agent_port);

    AgentService::new(config, Arc::new(ProcessRunner), Arc::new(LocalSystem))
        .serve()
        .await?;
    Ok(())
}

async fn init_cluster(config_path: PathBuf, args: InitClusterArgs) -> Result<()> {
    let spec = InputFile::load(&args.input_file)?.into_specification(args.force)?;
    check_open_file_limit();

    let client = hub_client(&config_path).await?;
    let mut renderer = StreamRenderer::new();
    client.make_cluster(&spec, &mut renderer).await?;

    info!("Cluster initialized successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_cluster_arguments() {
        let cli = Cli::parse_from(["gp", "--config-file", "/etc/gp.conf", "init", "cluster", "cluster.json", "--force"]);

        assert_eq!(cli.config_path().unwrap(), PathBuf::from("/etc/gp.conf"));
        match cli.command {
            Commands::Init(InitCommand::Cluster(args)) => {
                assert_eq!(args.input_file, PathBuf::from("cluster.json"));
                assert!(args.force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_service_subcommands() {
        let cli = Cli::parse_from(["gp", "stop", "hub"]);
        assert!(matches!(cli.command, Commands::Stop(StopCommand::Hub)));

        let cli = Cli::parse_from(["gp", "status", "agents", "--config-file", "/etc/gp.conf"]);
        assert!(matches!(cli.command, Commands::Status(ServiceCommand::Agents)));
        assert_eq!(cli.config_file, Some(PathBuf::from("/etc/gp.conf")));
    }

    #[test]
    fn test_unknown_service_is_rejected() {
        assert!(Cli::try_parse_from(["gp", "start", "coordinator"]).is_err());
    }
}

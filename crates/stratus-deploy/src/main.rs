//! stratus-deploy binary.
//!
//! Deploys or deletes the single VM described by the configured manifest.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stratus_deploy::{
    CpiCloud, DeployOutcome, DeployRequest, Deployer, FileStateStore, HttpAgentClient, Manifest,
    StratusConfig,
};

#[derive(Parser)]
#[command(name = "stratus-deploy")]
#[command(about = "Deploy and converge a single VM from a manifest")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to `stratus.toml` in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the deployment
    Deploy,

    /// Delete the VM, its disks and stemcells
    Delete,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("stratus_deploy=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StratusConfig::from_file(path)?,
        None => StratusConfig::load()?,
    };

    let manifest_path = config.deployment.require_manifest()?;
    let manifest = Manifest::load(manifest_path).await?;
    manifest.validate()?;

    info!(
        deployment = %manifest.name,
        state = %config.state.path.display(),
        cpi = %config.cpi.binary.display(),
        "configuration loaded"
    );

    let store = Arc::new(FileStateStore::open(&config.state.path)?);
    let cloud = Arc::new(CpiCloud::new(&config.cpi));
    let agent = Arc::new(HttpAgentClient::new(&manifest.mbus, &config.agent)?);
    let deployer = Deployer::new(store, cloud, agent, &config.deploy);

    match cli.command {
        Commands::Deploy => {
            let request = DeployRequest {
                stemcell: config.deployment.require_stemcell()?.clone(),
                releases: config.deployment.releases.clone(),
                manifest,
            };
            let report = deployer.deploy(&request).await?;

            match report.outcome {
                DeployOutcome::UpToDate => info!("no changes, nothing deployed"),
                DeployOutcome::Deployed => info!(
                    vm_cid = report.vm.as_ref().map_or("-", |vm| vm.cid.as_str()),
                    disk_cid = report.disk.as_ref().map_or("-", |disk| disk.cid.as_str()),
                    "deployed"
                ),
            }
        }
        Commands::Delete => deployer.delete(&manifest).await?,
    }

    Ok(())
}

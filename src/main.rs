mod cli;
mod config;
mod error;
mod manager;
mod model;
mod registry;
mod resolver;
mod transfer;
mod workflow;

use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use error::Result;
use manager::ModelManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };

    match cli.command {
        Commands::InitConfig { force } => {
            if config_path.exists() && !force {
                return Err(error::Error::InvalidInput(format!(
                    "{} already exists. Use --force to overwrite it",
                    config_path.display()
                )));
            }
            Config::default().save(&config_path)?;
            println!("✓ Wrote default configuration to {}", config_path.display());
        }

        Commands::Fetch {
            workflow,
            workers,
            retries,
        } => {
            let mut config = Config::load(&config_path)?;
            if let Some(workers) = workers {
                config.max_workers = workers;
            }
            if let Some(retries) = retries {
                config.retry_attempts = retries;
            }
            config.validate()?;

            tracing::info!("Using models under {:?}", config.comfyui_path);
            let manager = ModelManager::new(config)?;
            manager.process_workflow(&workflow).await?.into_result()?;
        }

        Commands::Check { workflow } => {
            let manager = ModelManager::new(Config::load(&config_path)?)?;
            let classification = manager.check_workflow(&workflow)?;
            if !classification.missing.is_empty() {
                println!(
                    "\nRun 'modelfetch fetch {}' to download them.",
                    workflow.display()
                );
            }
        }

        Commands::List { hash } => {
            let manager = ModelManager::new(Config::load(&config_path)?)?;
            manager.list_installed(hash)?;
        }
    }

    Ok(())
}

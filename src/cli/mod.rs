use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "modelfetch")]
#[command(version, about = "Finds and downloads the models a ComfyUI workflow needs", long_about = None)]
pub struct Cli {
	/// Configuration file (defaults to the user config directory)
	#[arg(long, global = true, env = "MODELFETCH_CONFIG")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Download every model a workflow references that is not installed
	Fetch {
		/// Workflow file in ComfyUI API format
		workflow: PathBuf,

		/// Parallel downloads (overrides max_workers)
		#[arg(long)]
		workers: Option<usize>,

		/// Attempts per download (overrides retry_attempts)
		#[arg(long)]
		retries: Option<u32>,
	},

	/// Report which models of a workflow are missing, without downloading
	Check {
		/// Workflow file in ComfyUI API format
		workflow: PathBuf,
	},

	/// List installed models
	List {
		/// Also print a content hash for each model
		#[arg(long)]
		hash: bool,
	},

	/// Write a default configuration file
	InitConfig {
		/// Overwrite an existing file
		#[arg(long)]
		force: bool,
	},
}

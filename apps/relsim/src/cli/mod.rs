//! # relsim CLI Module
//!
//! This module implements the CLI interface for relsim.
//!
//! ## Available Commands
//!
//! - `run` - Evolve a topology (or resume a checkpoint) through the pipeline
//! - `status` - Show topology metrics
//! - `compact` - Drop edges below a weight threshold
//! - `generate` - Write a ring, path or grid topology
//! - `inspect` - Summarise a checkpoint file
//! - `hash` - Compute BLAKE3 hash of a checkpoint file

mod commands;

use clap::{Parser, Subcommand};
use relsim_core::RelsimError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// relsim - relational graph evolution
///
/// Evolves a complex state on a weighted graph under the Cayley map and
/// rewires the graph between steps.
#[derive(Parser, Debug)]
#[command(name = "relsim")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evolve a topology through the pipeline
    Run {
        /// Topology file (JSON edge list)
        #[arg(short, long, required_unless_present = "resume")]
        topology: Option<PathBuf>,

        /// Resume from a checkpoint instead of a fresh topology
        #[arg(short, long, conflicts_with = "topology")]
        resume: Option<PathBuf>,

        /// Number of ticks
        #[arg(short = 'n', long, default_value = "100")]
        steps: u64,

        /// Time step
        #[arg(long, default_value = "0.01")]
        dt: f64,

        /// Gauge components per node
        #[arg(short, long, default_value = "1")]
        gauge: usize,

        /// Uniform node mass used by hard rewiring
        #[arg(long)]
        mass: Option<f64>,

        /// Soft-rewiring threshold; overrides `weight_threshold` from the config
        #[arg(long)]
        soft_threshold: Option<f64>,

        /// Ticks between soft-rewiring passes
        #[arg(long, default_value = "1")]
        soft_interval: u64,

        /// Halt after this many consecutive unhealthy ticks
        #[arg(long)]
        guard: Option<usize>,

        /// Write a checkpoint here when the run ends
        #[arg(short, long)]
        save: Option<PathBuf>,
    },

    /// Show topology metrics
    Status {
        /// Topology file (JSON edge list)
        #[arg(short, long)]
        topology: PathBuf,
    },

    /// Remove edges lighter than a threshold
    Compact {
        /// Topology file (JSON edge list)
        #[arg(short, long)]
        topology: PathBuf,

        /// Edges with weight below this are removed
        #[arg(long)]
        threshold: f64,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Generate a regular topology
    Generate {
        /// Shape (ring, path, grid)
        #[arg(short, long, default_value = "ring")]
        shape: String,

        /// Node count (ring and path)
        #[arg(short, long, default_value = "16")]
        nodes: usize,

        /// Grid width
        #[arg(long)]
        width: Option<usize>,

        /// Grid height
        #[arg(long)]
        height: Option<usize>,

        /// Weight of every edge
        #[arg(short, long, default_value = "1.0")]
        weight: f64,

        /// Uniform node potential
        #[arg(short, long)]
        potential: Option<f64>,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarise a checkpoint file
    Inspect {
        /// Checkpoint file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 hash of a checkpoint file
    Hash {
        /// Checkpoint file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), RelsimError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Run {
            topology,
            resume,
            steps,
            dt,
            gauge,
            mass,
            soft_threshold,
            soft_interval,
            guard,
            save,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            let source = match (topology, resume) {
                (_, Some(path)) => RunSource::Checkpoint(path),
                (Some(path), None) => RunSource::Topology(path),
                (None, None) => {
                    return Err(RelsimError::InvalidArgument(
                        "either --topology or --resume is required".to_string(),
                    ));
                }
            };
            let options = RunOptions {
                source,
                steps,
                dt,
                gauge_dim: gauge,
                mass,
                soft_threshold,
                soft_interval,
                guard,
                save,
            };
            cmd_run(&config, &options, json_mode).map(|_| ())
        }
        Some(Commands::Status { topology }) => cmd_status(&topology, json_mode),
        Some(Commands::Compact {
            topology,
            threshold,
            output,
        }) => cmd_compact(&topology, threshold, &output, json_mode),
        Some(Commands::Generate {
            shape,
            nodes,
            width,
            height,
            weight,
            potential,
            output,
        }) => {
            let shape = Shape::parse(&shape, nodes, width, height)?;
            cmd_generate(shape, weight, potential, &output, json_mode)
        }
        Some(Commands::Inspect { input }) => cmd_inspect(&input, json_mode),
        Some(Commands::Hash { input }) => cmd_hash(&input, json_mode),
        None => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}

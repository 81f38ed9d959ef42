// SPDX-License-Identifier: GPL-3.0-only

use camera_plugins::logging::init_tracing;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-plugins")]
#[command(about = "Plugin orchestration engine for a camera pipeline")]
#[command(version = camera_plugins::constants::app_info::version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the cameras of the simulated provider
    List {
        /// Number of simulated cameras
        #[arg(long, default_value = "2")]
        cameras: usize,
    },

    /// Run the engine with the built-in modules against a simulated camera
    Simulate {
        /// Camera index to bind
        #[arg(short, long, default_value = "0")]
        camera: usize,

        /// Number of simulated cameras
        #[arg(long, default_value = "2")]
        cameras: usize,

        /// Simulated frame rate
        #[arg(short, long, default_value = "30")]
        fps: u32,

        /// How long to stream, in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Override the maximum number of dispatch workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Engine configuration file (default: ~/.config/camera-plugins/engine.json)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Persist settings to this JSON file
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Bind without the analysis use case
        #[arg(long)]
        no_analysis: bool,
    },

    /// Print the effective engine configuration
    Config {
        /// Configuration file (default: ~/.config/camera-plugins/engine.json)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { cameras } => cli::list_cameras(cameras),
        Commands::Simulate {
            camera,
            cameras,
            fps,
            seconds,
            workers,
            config,
            settings,
            no_analysis,
        } => cli::simulate(cli::SimulateOptions {
            camera,
            cameras,
            fps,
            seconds,
            workers,
            config,
            settings,
            analysis: !no_analysis,
        }),
        Commands::Config { path } => cli::print_config(path),
    }
}

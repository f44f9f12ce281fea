// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use emulated_camera::backends::emulated::{Dataspace, PixelFormat};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "emulated-camera")]
#[command(about = "Drive the request pipeline of an emulated camera")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames from a simulated sensor
    Run {
        /// Number of capture requests to submit
        #[arg(short, long, default_value = "30")]
        frames: u32,

        /// Processor config (default: ~/.config/emulated-camera/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Static characteristics as JSON
        #[arg(long)]
        characteristics: Option<PathBuf>,
    },

    /// Print the default request templates as JSON
    Templates {
        /// Static characteristics as JSON
        #[arg(long)]
        characteristics: Option<PathBuf>,
    },

    /// Print the buffer geometry of a stream
    Geometry {
        /// Pixel format (rgb888, rgba8888, y16, blob, raw16)
        #[arg(short, long)]
        format: PixelFormat,

        #[arg(short, long)]
        width: u32,

        #[arg(short = 'H', long)]
        height: u32,

        /// Dataspace (unknown, depth, jfif, srgb)
        #[arg(short, long, default_value = "unknown")]
        dataspace: Dataspace,

        /// Declared buffer size for blob streams
        #[arg(short, long, default_value = "0")]
        buffer_size: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=emulated_camera=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            frames,
            config,
            characteristics,
        } => cli::run_capture(frames, config, characteristics),
        Commands::Templates { characteristics } => cli::print_templates(characteristics),
        Commands::Geometry {
            format,
            width,
            height,
            dataspace,
            buffer_size,
        } => cli::print_geometry(format, width, height, dataspace, buffer_size),
    }
}

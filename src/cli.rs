use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "recast")]
#[command(author, version, about = "Bounded media transcoding job service")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the job service with the HTTP API
    Start {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Convert a single file locally through the same invoker
    Convert {
        /// Input file to convert
        #[arg(required = true)]
        input: PathBuf,

        /// Output path (defaults to the input with the configured extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Audio codec override
        #[arg(long)]
        codec: Option<String>,

        /// Audio bitrate override
        #[arg(long)]
        bitrate: Option<String>,
    },

    /// Check that the external encoder is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

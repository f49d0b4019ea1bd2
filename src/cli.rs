use crate::config::HostConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nbf")]
#[command(about = "Stream NBF commands to a target over a serial link", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Serial port (full path or name)
    #[arg(short, long, env = "NBF_PORT", global = true)]
    pub port: Option<String>,

    /// Serial port baud rate
    #[arg(short = 'b', long = "baud", env = "NBF_BAUD", global = true)]
    pub baud_rate: Option<u32>,

    /// Read timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Configuration file (default: $CONFIG_DIR/nbf-host/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, global = true, conflicts_with = "quiet")]
    pub debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a file of NBF commands to the target
    Load(LoadArgs),

    /// Send an "unfreeze" command to the target
    Unfreeze {
        /// Continue listening for incoming messages until the target finishes
        #[arg(long)]
        listen: bool,
    },

    /// Read back the memory writes of an NBF file and confirm that their
    /// values match the file
    Verify {
        /// NBF-formatted reference file
        file: PathBuf,
    },

    /// Watch for incoming messages and print the received data
    Listen {
        /// Log every message, including putchar
        #[arg(long)]
        verbose: bool,
    },
}

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// NBF-formatted file to load
    pub file: PathBuf,

    /// Suppress any "unfreeze" commands in the input file
    #[arg(long)]
    pub no_unfreeze: bool,

    /// Continue listening for incoming messages until the target finishes
    #[arg(long)]
    pub listen: bool,

    /// Maximum number of outstanding replies to allow before blocking
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Log all sent and received commands, even if valid
    #[arg(long)]
    pub verbose: bool,

    /// Abort on the first invalid reply
    #[arg(long)]
    pub strict: bool,
}

impl Cli {
    /// Apply command-line overrides on top of file configuration.
    pub fn apply_to(&self, config: &mut HostConfig) {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.serial.baud_rate = baud_rate;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.serial.timeout_ms = timeout_ms;
        }
        if let Commands::Load(args) = &self.command {
            if let Some(window_size) = args.window_size {
                config.load.window_size = window_size;
            }
            if args.strict {
                config.load.strict_replies = true;
            }
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "orbit.yaml";

#[derive(Parser, Debug)]
#[command(name = "orbit")]
#[command(about = "Orbit - ride dispatch and real-time driver locations")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the service with the given configuration
    Start {
        /// Which listeners to run
        #[arg(short, long, value_enum, default_value = "all")]
        mode: ServiceMode,

        /// Path to the configuration file
        #[arg(short, long, env = "ORBIT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override HTTP port
        #[arg(long)]
        http: Option<u16>,

        /// Override WebSocket port
        #[arg(long)]
        ws: Option<u16>,

        /// Write the demo drivers before serving
        #[arg(long)]
        seed: bool,

        /// Override the configured log format
        #[arg(long, value_enum)]
        log_format: Option<LogFormatArg>,
    },

    /// Validate configuration without starting the service
    Validate {
        /// Path to the configuration file
        #[arg(short, long, env = "ORBIT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Write the demo drivers into the configured store and exit
    Seed {
        /// Path to the configuration file
        #[arg(short, long, env = "ORBIT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceMode {
    /// HTTP matching API and WebSocket fan-out in one process
    All,

    /// HTTP matching API only
    Dispatch,

    /// WebSocket fan-out only
    Realtime,
}

impl ServiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::All => "all",
            ServiceMode::Dispatch => "dispatch",
            ServiceMode::Realtime => "realtime",
        }
    }

    pub fn runs_http(&self) -> bool {
        matches!(self, ServiceMode::All | ServiceMode::Dispatch)
    }

    pub fn runs_websocket(&self) -> bool {
        matches!(self, ServiceMode::All | ServiceMode::Realtime)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
    Compact,
}

impl LogFormatArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormatArg::Pretty => "pretty",
            LogFormatArg::Json => "json",
            LogFormatArg::Compact => "compact",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

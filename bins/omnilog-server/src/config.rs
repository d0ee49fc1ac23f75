use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "omnilog-server", about = "Audit log event ingestion service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ingestion pipeline
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "OMNILOG_CONFIG")]
    pub config: String,

    /// Seconds to wait for in-flight events on shutdown
    #[arg(long, default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

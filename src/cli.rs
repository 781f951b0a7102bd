//! Shared CLI plumbing (§6.2): verbosity flags and defaults common to all
//! three binaries.

use clap::Args;
use tracing_subscriber::EnvFilter;

use crate::session::Strategy;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_STORAGE_DIR: &str = "./server/files";

#[derive(Args, Debug)]
pub struct Verbosity {
    /// Lower the log level to debug.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Raise the log level to warn, suppressing informational output.
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Verbosity {
    fn default_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

/// Initializes the process-wide `tracing` subscriber from `-v`/`-q`,
/// honoring `RUST_LOG` if the user set it explicitly.
pub fn init_tracing(verbosity: &Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.default_level()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[derive(Args, Debug)]
pub struct StrategyArg {
    /// ARQ strategy to use for this transfer.
    #[arg(short = 'r', long, default_value = "udp_saw")]
    pub strategy: Strategy,
}

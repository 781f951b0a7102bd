//! `start-server` — runs the udpft server demultiplexer (§6.2).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use udpft::cli::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_STORAGE_DIR, StrategyArg, Verbosity, init_tracing};
use udpft::server::{self, ServerConfig};

#[derive(Parser, Debug)]
#[command(about = "Run the udpft file-transfer server")]
struct Cli {
    /// Address to bind the listening socket to.
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind the listening socket to.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory uploaded files are written to and downloaded files are
    /// served from.
    #[arg(short = 's', long, default_value = DEFAULT_STORAGE_DIR)]
    storagedir: PathBuf,

    /// Fraction of outbound datagrams to drop, for loss testing (test hook).
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    #[command(flatten)]
    strategy: StrategyArg,

    #[command(flatten)]
    verbosity: Verbosity,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.verbosity);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("interrupt received, shutting down");
        stop_handler.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!("failed to install SIGINT handler: {e}");
    }

    let fault_injector = if cli.drop_rate > 0.0 {
        Some(Arc::new(udpft::fault::FaultInjector::new(cli.drop_rate)))
    } else {
        None
    };

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        storage_dir: cli.storagedir,
        strategy: cli.strategy.strategy,
        fault_injector,
    };

    match server::run(config, stop) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("server error: {e}");
            ExitCode::from(1)
        }
    }
}

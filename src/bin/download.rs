//! `download` — fetches a file from a udpft server (§6.2).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use udpft::cli::{DEFAULT_HOST, DEFAULT_PORT, StrategyArg, Verbosity, init_tracing};
use udpft::client::{self, ClientConfig, ClientJob};
use udpft::fault::FaultInjector;
use udpft::session::TransferOutcome;

#[derive(Parser, Debug)]
#[command(about = "Download a file from a udpft server")]
struct Cli {
    /// Server host.
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory to write the downloaded file into.
    #[arg(short = 'd', long)]
    dstdir: PathBuf,

    /// Name of the remote file, and the name it is saved under locally.
    #[arg(short = 'n', long)]
    name: String,

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

    let dest_path = cli.dstdir.join(&cli.name);
    let fault_injector = if cli.drop_rate > 0.0 {
        Some(Arc::new(FaultInjector::new(cli.drop_rate)))
    } else {
        None
    };

    let config = ClientConfig {
        host: cli.host,
        port: cli.port,
        strategy: cli.strategy.strategy,
        fault_injector,
    };
    let job = ClientJob::Download {
        filename: cli.name.clone(),
        dest_path,
    };

    match client::run(config, job) {
        Ok(outcome) => {
            client::report_outcome(&cli.name, outcome);
            match outcome {
                TransferOutcome::Success => ExitCode::SUCCESS,
                TransferOutcome::IntegrityMismatch => ExitCode::from(1),
            }
        }
        Err(e) => {
            tracing::error!("download failed: {e}");
            ExitCode::from(255)
        }
    }
}

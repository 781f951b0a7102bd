//! `upload` — sends a local file to a udpft server (§6.2).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use udpft::cli::{DEFAULT_HOST, DEFAULT_PORT, StrategyArg, Verbosity, init_tracing};
use udpft::client::{self, ClientConfig, ClientJob};
use udpft::fault::FaultInjector;
use udpft::session::TransferOutcome;

#[derive(Parser, Debug)]
#[command(about = "Upload a file to a udpft server")]
struct Cli {
    /// Server host.
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port.
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory containing the file to upload.
    #[arg(short = 's', long)]
    srcdir: PathBuf,

    /// Name of the file (relative to `srcdir`, and the name it is stored
    /// under on the server).
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

    let src_path = cli.srcdir.join(&cli.name);
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
    let job = ClientJob::Upload {
        src_path,
        filename: cli.name.clone(),
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
            tracing::error!("upload failed: {e}");
            ExitCode::from(255)
        }
    }
}

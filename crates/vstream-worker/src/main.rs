//! vstream-worker binary.

use clap::Parser;
use tracing::{error, info};

use vstream_worker::config::{Cli, Command};
use vstream_worker::logging::init_tracing;
use vstream_worker::signal::interrupt_signal;
use vstream_worker::supervisor::run_worker_process;
use vstream_worker::{run_batch, BatchSettings, WorkerError};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        let code = e
            .downcast_ref::<WorkerError>()
            .map_or(1, WorkerError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => batch(args.into_settings(), &cli.log_level).await,
        Command::Download(args) => batch(args.into_download_settings(), &cli.log_level).await,
        Command::Worker(args) => {
            run_worker_process(&args.assignment, &args.report, interrupt_signal()).await?;
            Ok(())
        }
    }
}

async fn batch(settings: Result<BatchSettings, WorkerError>, log_level: &str) -> anyhow::Result<()> {
    let settings = settings?;
    info!("Starting vstream-worker");

    let report = run_batch(&settings, log_level, interrupt_signal()).await?;
    if report.interrupted {
        info!("Batch interrupted: {}", report.counts());
    }
    Ok(())
}

use std::process::ExitCode;

use clap::Parser;

use ftpserver::cli::Cli;
use ftpserver::lifecycle::signals::operator_quit;
use ftpserver::lifecycle::startup::{self, AppContext};
use ftpserver::observability::logging;
use ftpserver::AppError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let ctx = match AppContext::from_cli(&cli) {
        Ok(ctx) => ctx,
        Err(e) => return report(e),
    };
    if let Err(e) = logging::init(&ctx.options.logging) {
        return report(e.into());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %ctx.selection.kind(),
        authentication = %ctx.options.authentication,
        layout = ?ctx.options.layout,
        "ftpserver starting"
    );

    match startup::run(&ctx, operator_quit()).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            report(e)
        }
    }
}

fn report(error: AppError) -> ExitCode {
    eprintln!("error: {}", error);
    ExitCode::from(error.exit_code())
}

//! flowrun CLI entry point.
//!
//! Binary name: `flowrun`
//!
//! Parses CLI arguments, loads configuration, sets up tracing, then
//! dispatches to the command handler.

mod cli;
mod state;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use flowrun_observe::TracingOptions;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need configuration or logging
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowrun", &mut std::io::stdout());
        return Ok(());
    }

    let work_dir = std::env::current_dir().context("failed to determine working directory")?;
    let config = {
        let _guard = tracing::subscriber::set_default(flowrun_observe::bootstrap_subscriber());
        flowrun_infra::config::load_config(&work_dir).await
    };

    let filter = match (&config.log.filter, cli.verbose, cli.quiet) {
        (Some(filter), 0, false) => filter.clone(),
        _ => TracingOptions::filter_for_verbosity(cli.verbose, cli.quiet).to_string(),
    };
    let options = TracingOptions {
        filter,
        json: config.log.json,
        otel: cli.otel || config.log.otel,
    };
    if let Err(e) = flowrun_observe::init_tracing(&options) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let state = AppState::new(config);
    let result = dispatch(cli, &state).await;
    flowrun_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: &AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            document,
            allow_incomplete,
            print_document,
        } => {
            let shutdown = CancellationToken::new();
            tokio::spawn(cancel_on_signal(shutdown.clone()));
            let options = cli::run::RunOptions {
                allow_incomplete,
                print_document,
                verbose: cli.verbose,
                quiet: cli.quiet,
                json: cli.json,
            };
            cli::run::run(state, &document, &options, &shutdown).await
        }

        Commands::Plan { document } => cli::plan::plan(state, &document, cli.json).await,

        Commands::Kinds => cli::kinds::kinds(state, cli.json),

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("interrupt received, stopping run");
    token.cancel();
}

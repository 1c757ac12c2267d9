use anyhow::Result;
use clap::Parser;
use cli::Cli;
use sightline_common::observability::{init_logging, LogConfig};
use suite::Suite;
use tokio_util::sync::CancellationToken;
mod cli;
mod suite;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // defaults < file < env < flags
    let config = cli.load_config()?;

    let log_path = init_logging(LogConfig {
        debug_ai: config.ai.debug,
        ..LogConfig::default()
    })?;
    tracing::info!(log = %log_path.display(), "app.start");

    let suite = Suite::build(config, cli.pattern.as_deref()).await?;
    let outcome = run(&suite, cli.watch).await;
    suite.shutdown().await;

    let code = outcome?;
    tracing::info!(code, "app.exit");
    std::process::exit(code)
}

async fn run(suite: &Suite, watch: bool) -> Result<i32> {
    let code = suite.run_once().await?.exit_code();
    if !watch {
        return Ok(code);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });
    suite.watch(&cancel, code).await
}

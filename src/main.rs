mod args;
mod cmd_daemon;

use args::{Cli, Commands};
use clap::Parser;
use sockethub::config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_daemon::cmd_daemon_run(config, cli.config).await?,
        Commands::Check => cmd_daemon::cmd_daemon_check(&config).await?,
        Commands::Worker {
            sockethub_id,
            worker_id,
        } => {
            let code = cmd_daemon::cmd_daemon_worker(config, sockethub_id, worker_id).await;
            std::process::exit(code);
        }
    }

    Ok(())
}

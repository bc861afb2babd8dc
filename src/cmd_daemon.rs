use anyhow::{Context, Result};
use sockethub::config::Config;
use sockethub::daemon::readiness::{ReadinessProbe, RedisProbe};
use sockethub::daemon::server::DaemonServer;
use sockethub::daemon::worker;
use std::path::PathBuf;

pub async fn cmd_daemon_run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let server = DaemonServer::new(config, config_path);
    server.run().await
}

/// Returns the worker's exit code; the caller ends the process with it.
pub async fn cmd_daemon_worker(config: Config, sockethub_id: String, worker_id: u32) -> i32 {
    worker::run(worker_id, sockethub_id, &config).await
}

pub async fn cmd_daemon_check(config: &Config) -> Result<()> {
    let probe = RedisProbe::from_config(&config.redis);
    probe
        .check_ready()
        .await
        .with_context(|| format!("Redis at {} is not ready", probe.addr()))?;
    println!("Redis at {} is ready", probe.addr());
    Ok(())
}

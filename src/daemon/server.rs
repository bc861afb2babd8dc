use super::process::ProcessLauncher;
use super::readiness::{ReadinessProbe, RedisProbe};
use super::shutdown::{spawn_signal_listener, ShutdownCoordinator};
use super::supervisor::{Supervisor, WorkerLauncher};
use crate::config::Config;
use crate::connect_config;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info};

/// Identity shared by every worker of one supervisor run.
pub fn generate_sockethub_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub struct DaemonServer {
    config: Config,
    config_path: Option<PathBuf>,
    sockethub_id: String,
}

impl DaemonServer {
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            config,
            config_path,
            sockethub_id: generate_sockethub_id(),
        }
    }

    pub fn sockethub_id(&self) -> &str {
        &self.sockethub_id
    }

    /// Check redis, write the connect descriptor, then supervise worker
    /// processes until interrupted.
    pub async fn run(self) -> Result<()> {
        info!(sockethub_id = %self.sockethub_id, "Sockethub starting...");

        RedisProbe::from_config(&self.config.redis)
            .check_ready()
            .await
            .context("Redis check failed, not starting workers")?;
        info!("Redis check successful");

        self.write_connect_config().await;

        let launcher = ProcessLauncher::current_exe(self.sockethub_id.clone())
            .context("Unable to locate the sockethub executable")?
            .config_path(self.config_path.clone());

        let shutdown = ShutdownCoordinator::new();
        spawn_signal_listener(shutdown.handle())?;
        self.supervise(launcher, shutdown).await
    }

    /// Run the supervisor with a given launcher until `shutdown` fires or
    /// the last worker exits after a fatal error.
    pub async fn supervise<L: WorkerLauncher>(
        &self,
        launcher: L,
        shutdown: ShutdownCoordinator,
    ) -> Result<()> {
        let mut supervisor = Supervisor::new(launcher, self.config.effective_worker_count())
            .with_shutdown_timeout(self.config.shutdown_timeout());

        supervisor.start().await.context("Failed to spawn workers")?;
        info!(workers = supervisor.worker_count(), "Sockethub ready");

        supervisor
            .run(shutdown)
            .await
            .context("Failed to replace a worker")?;
        info!("Sockethub stopped");
        Ok(())
    }

    async fn write_connect_config(&self) {
        if !self.config.examples.enable {
            return;
        }
        if let Err(e) = connect_config::write(&self.config).await {
            error!(
                path = %connect_config::path(&self.config).display(),
                error = %e,
                "Failed to write connect config, examples may not work"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::protocol::{ControlMessage, ProtocolError};
    use crate::daemon::supervisor::{WorkerEvent, WorkerHandle, WorkerId};
    use crate::error::exit_code;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Workers that acknowledge `Shutdown` by exiting with code 1.
    #[derive(Clone, Default)]
    struct ObedientLauncher {
        launched: Arc<AtomicUsize>,
    }

    struct ObedientWorker {
        id: WorkerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
    }

    #[async_trait]
    impl WorkerHandle for ObedientWorker {
        fn id(&self) -> WorkerId {
            self.id
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        async fn send(&mut self, message: &ControlMessage) -> std::result::Result<(), ProtocolError> {
            if *message == ControlMessage::Shutdown {
                let _ = self.events.send(WorkerEvent::Exited {
                    id: self.id,
                    code: Some(exit_code::FATAL),
                    signal: None,
                });
                let _ = self.events.send(WorkerEvent::Disconnected { id: self.id });
            }
            Ok(())
        }

        async fn kill(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl WorkerLauncher for ObedientLauncher {
        async fn launch(
            &mut self,
            id: WorkerId,
            events: mpsc::UnboundedSender<WorkerEvent>,
        ) -> std::io::Result<Box<dyn WorkerHandle>> {
            self.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ObedientWorker { id, events }))
        }
    }

    #[test]
    fn test_sockethub_id_is_unique() {
        let a = generate_sockethub_id();
        let b = generate_sockethub_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_supervise_uses_clamped_worker_count() {
        let mut config = Config::default();
        config.num_workers = Some(4);
        let server = DaemonServer::new(config, None);

        let launcher = ObedientLauncher::default();
        let shutdown = ShutdownCoordinator::new();
        shutdown.handle().shutdown();

        tokio::time::timeout(
            Duration::from_secs(1),
            server.supervise(launcher.clone(), shutdown),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_config_written_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.examples.location = dir.path().to_path_buf();
        config.examples.enable = false;

        DaemonServer::new(config.clone(), None)
            .write_connect_config()
            .await;
        assert!(!connect_config::path(&config).exists());

        config.examples.enable = true;
        DaemonServer::new(config.clone(), None)
            .write_connect_config()
            .await;
        assert!(connect_config::path(&config).exists());
    }
}

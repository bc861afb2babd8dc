//! Worker processes: the supervisor re-executes its own binary in worker mode.

use super::protocol::{ControlMessage, MessageFrame, ProtocolError};
use super::supervisor::{WorkerEvent, WorkerHandle, WorkerId, WorkerLauncher};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Launches `<program> worker <sockethub-id> --worker-id N [--config PATH]`.
pub struct ProcessLauncher {
    program: PathBuf,
    sockethub_id: String,
    config_path: Option<PathBuf>,
    working_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, sockethub_id: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            sockethub_id: sockethub_id.into(),
            config_path: None,
            working_dir: None,
        }
    }

    /// Launcher for the running executable.
    pub fn current_exe(sockethub_id: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, sockethub_id))
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn args(&self, id: WorkerId) -> Vec<String> {
        let mut args = vec![
            "worker".to_string(),
            self.sockethub_id.clone(),
            "--worker-id".to_string(),
            id.to_string(),
        ];
        if let Some(path) = &self.config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        args
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(
        &mut self,
        id: WorkerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<Box<dyn WorkerHandle>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(id));
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // Workers log to the supervisor's stderr; stdin is the control channel.
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdin was not captured"))?;

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!(id, error = %e, "Failed to kill worker");
                    }
                    child.wait().await
                }
            };

            let (code, signal) = match status {
                Ok(status) => exit_details(&status),
                Err(e) => {
                    warn!(id, error = %e, "Failed waiting for worker");
                    (None, None)
                }
            };
            debug!(id, ?code, ?signal, "Worker process ended");
            let _ = events.send(WorkerEvent::Exited { id, code, signal });
            let _ = events.send(WorkerEvent::Disconnected { id });
        });

        Ok(Box::new(ProcessWorker {
            id,
            pid,
            stdin: Some(stdin),
            kill: Some(kill_tx),
        }))
    }
}

fn exit_details(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    (status.code(), signal)
}

pub struct ProcessWorker {
    id: WorkerId,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    kill: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    fn id(&self) -> WorkerId {
        self.id
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn send(&mut self, message: &ControlMessage) -> Result<(), ProtocolError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "control channel already closed",
            ))
        })?;
        if let Err(e) = MessageFrame::write(stdin, message).await {
            self.stdin = None;
            return Err(e);
        }
        Ok(())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.stdin = None;
        match self.kill.take() {
            Some(kill) => {
                // The watcher may have already observed the exit.
                let _ = kill.send(());
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn next_events(
        rx: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> (WorkerEvent, WorkerEvent) {
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        (first, second)
    }

    #[test]
    fn test_worker_args() {
        let launcher = ProcessLauncher::new("/usr/bin/sockethub", "abc123")
            .config_path(Some(PathBuf::from("/etc/sockethub.toml")));
        assert_eq!(
            launcher.args(4),
            vec![
                "worker",
                "abc123",
                "--worker-id",
                "4",
                "--config",
                "/etc/sockethub.toml"
            ]
        );
    }

    /// Launcher running `sh worker ...` against a stub script in a temp dir.
    fn stub_launcher(dir: &tempfile::TempDir, script: &str) -> ProcessLauncher {
        std::fs::write(dir.path().join("worker"), script).unwrap();
        ProcessLauncher::new("sh", "abc").working_dir(dir.path())
    }

    #[tokio::test]
    async fn test_exit_then_disconnect_with_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = stub_launcher(&dir, "exit 1\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = launcher.launch(1, tx).await.unwrap();
        assert_eq!(handle.id(), 1);
        assert!(handle.pid().is_some());

        let (first, second) = next_events(&mut rx).await;
        assert_eq!(
            first,
            WorkerEvent::Exited {
                id: 1,
                code: Some(1),
                signal: None
            }
        );
        assert_eq!(second, WorkerEvent::Disconnected { id: 1 });
    }

    #[tokio::test]
    async fn test_worker_receives_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = stub_launcher(&dir, "[ \"$1\" = abc ] && [ \"$3\" = 7 ] && exit 0\nexit 3\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = launcher.launch(7, tx).await.unwrap();

        let (first, _) = next_events(&mut rx).await;
        assert!(matches!(first, WorkerEvent::Exited { id: 7, code: Some(0), .. }));
    }

    #[tokio::test]
    async fn test_kill_reports_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = stub_launcher(&dir, "exec sleep 30\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = launcher.launch(2, tx).await.unwrap();

        handle.kill().await.unwrap();
        let (first, second) = next_events(&mut rx).await;
        assert_eq!(
            first,
            WorkerEvent::Exited {
                id: 2,
                code: None,
                signal: Some(libc::SIGKILL)
            }
        );
        assert_eq!(second, WorkerEvent::Disconnected { id: 2 });
        assert!(handle.send(&ControlMessage::Shutdown).await.is_err());
    }
}

//! Supervisor: keeps the desired number of workers alive and propagates
//! shutdown to them.
//!
//! Lifecycle events arrive on a single channel, in order per worker:
//! [`WorkerEvent::Exited`] first, then [`WorkerEvent::Disconnected`]. The exit
//! decides whether the supervisor latches; the disconnect decides whether a
//! replacement is spawned.

use super::protocol::{ControlMessage, ProtocolError};
use super::shutdown::ShutdownCoordinator;
use crate::error::exit_code;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub type WorkerId = u32;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Exited {
        id: WorkerId,
        code: Option<i32>,
        signal: Option<i32>,
    },
    Disconnected {
        id: WorkerId,
    },
}

/// Supervisor-side reference to one running worker.
#[async_trait]
pub trait WorkerHandle: Send {
    fn id(&self) -> WorkerId;

    fn pid(&self) -> Option<u32>;

    async fn send(&mut self, message: &ControlMessage) -> Result<(), ProtocolError>;

    async fn kill(&mut self) -> std::io::Result<()>;
}

/// Starts workers. Every launched worker must eventually report an
/// `Exited` and then a `Disconnected` event on `events`.
#[async_trait]
pub trait WorkerLauncher: Send {
    async fn launch(
        &mut self,
        id: WorkerId,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> std::io::Result<Box<dyn WorkerHandle>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Running,
    ShuttingDown,
    Stopped,
}

pub struct Supervisor<L: WorkerLauncher> {
    launcher: L,
    workers: HashMap<WorkerId, Box<dyn WorkerHandle>>,
    phase: SupervisorPhase,
    broadcast_sent: bool,
    desired_workers: usize,
    next_id: WorkerId,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    shutdown_timeout: Duration,
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L, desired_workers: usize) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            launcher,
            workers: HashMap::new(),
            phase: SupervisorPhase::Running,
            broadcast_sent: false,
            desired_workers,
            next_id: 1,
            events_tx,
            events_rx,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// How long to wait for workers after broadcasting shutdown before
    /// killing them.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    /// One-way latch: once set, no worker is respawned.
    pub fn is_shutting_down(&self) -> bool {
        self.phase != SupervisorPhase::Running
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Spawn the initial set of workers.
    pub async fn start(&mut self) -> std::io::Result<()> {
        info!(workers = self.desired_workers, "Initializing workers");
        for _ in 0..self.desired_workers {
            self.spawn_worker().await?;
        }
        Ok(())
    }

    pub async fn spawn_worker(&mut self) -> std::io::Result<WorkerId> {
        let id = self.next_id;
        self.next_id += 1;

        let handle = self.launcher.launch(id, self.events_tx.clone()).await?;
        info!(id, pid = ?handle.pid(), "Worker spawned");
        self.workers.insert(id, handle);
        Ok(id)
    }

    /// Apply one lifecycle event. Fails only when a replacement worker
    /// cannot be launched.
    pub async fn handle_event(&mut self, event: WorkerEvent) -> std::io::Result<()> {
        match event {
            WorkerEvent::Exited { id, code, signal } => {
                self.on_exit(id, code, signal);
                Ok(())
            }
            WorkerEvent::Disconnected { id } => self.on_disconnect(id).await,
        }
    }

    fn on_exit(&mut self, id: WorkerId, code: Option<i32>, signal: Option<i32>) {
        self.workers.remove(&id);
        if code == Some(exit_code::FATAL) {
            if !self.is_shutting_down() {
                warn!(id, "Worker exited with a fatal error, no more workers will be started");
            }
            self.phase = SupervisorPhase::ShuttingDown;
        } else {
            info!(id, ?code, ?signal, "Worker exited");
        }
    }

    async fn on_disconnect(&mut self, id: WorkerId) -> std::io::Result<()> {
        self.workers.remove(&id);
        if self.is_shutting_down() {
            info!(id, "Worker done");
            return Ok(());
        }

        error!(id, "Worker disconnected unexpectedly, spawning a new one");
        let replacement = self.spawn_worker().await?;
        debug!(id, replacement, "Replacement worker started");
        Ok(())
    }

    /// Latch shutdown and send `Shutdown` to every live worker, once.
    pub async fn begin_shutdown(&mut self) {
        self.phase = SupervisorPhase::ShuttingDown;
        if self.broadcast_sent {
            return;
        }
        self.broadcast_sent = true;

        info!(workers = self.workers.len(), "Sending shutdown to workers");
        for (id, worker) in self.workers.iter_mut() {
            if let Err(e) = worker.send(&ControlMessage::Shutdown).await {
                warn!(id = *id, error = %e, "Failed to deliver shutdown");
            }
        }
    }

    /// Supervise until an interrupt or until every worker is gone after the
    /// latch was set.
    pub async fn run(&mut self, mut interrupt: ShutdownCoordinator) -> std::io::Result<()> {
        while !(self.is_shutting_down() && self.workers.is_empty()) {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await?,
                    None => break,
                },
                _ = interrupt.wait() => {
                    info!("Caught interrupt, ending supervisor session");
                    self.begin_shutdown().await;
                    self.drain(&mut interrupt).await;
                    break;
                }
            }
        }

        self.phase = SupervisorPhase::Stopped;
        info!("Supervisor stopped");
        Ok(())
    }

    /// Observe exits until the shutdown deadline, or until a forced
    /// shutdown is requested, then kill stragglers.
    async fn drain(&mut self, interrupt: &mut ShutdownCoordinator) {
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        while !self.workers.is_empty() {
            tokio::select! {
                event = tokio::time::timeout_at(deadline, self.events_rx.recv()) => match event {
                    Ok(Some(event)) => {
                        if let Err(e) = self.handle_event(event).await {
                            error!(error = %e, "Failed handling worker event during shutdown");
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            remaining = self.workers.len(),
                            "Workers did not stop in time, force killing"
                        );
                        self.kill_all().await;
                    }
                },
                _ = interrupt.wait_forced() => {
                    warn!(remaining = self.workers.len(), "Forced shutdown, killing workers");
                    self.kill_all().await;
                }
            }
        }
    }

    async fn kill_all(&mut self) {
        for (id, worker) in self.workers.iter_mut() {
            if let Err(e) = worker.kill().await {
                error!(id = *id, error = %e, "Failed to kill worker");
            }
        }
        self.workers.clear();
    }
}

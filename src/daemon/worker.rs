//! Worker process: bootstrap sequence and control-message handling.
//!
//! ```text
//! Idle → Bootstrapping → Ready → ShuttingDown → Stopped
//!          │ fd limit
//!          │ redis readiness   (failure: exit 2, supervisor respawns)
//!          │ listeners         (failure: exit 1)
//!          │ dispatcher + front-end (failure: exit 1)
//!          ▼
//!        Ready: control handler registered
//! ```

use super::dispatcher::{Dispatcher, LocalDispatcher};
use super::limits;
use super::platform::{ListenerHandle, ListenerOptions, PlatformRegistry, DISPATCHER_PLATFORM};
use super::protocol::{ControlMessage, MessageFrame};
use super::readiness::{ReadinessProbe, RedisProbe};
use super::shutdown::{spawn_signal_listener, ShutdownCoordinator};
use crate::config::Config;
use crate::error::{exit_code, Result, WorkerError};
use crate::http_server::{FrontEndHandle, HttpServer, HttpServerConfig};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

const CONTROL_CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Bootstrapping,
    Ready,
    ShuttingDown,
    Stopped,
}

pub type DispatcherFactory = Box<dyn FnOnce(&PlatformRegistry) -> Arc<dyn Dispatcher> + Send>;

/// Collaborators used during bootstrap.
pub struct WorkerDeps {
    pub probe: Box<dyn ReadinessProbe>,
    pub platforms: PlatformRegistry,
    pub dispatcher: DispatcherFactory,
    /// Front-end to start once the dispatcher is up; `None` keeps it off.
    pub front_end: Option<HttpServerConfig>,
    /// Target for the descriptor limit; `None` leaves limits untouched.
    pub fd_limit: Option<u64>,
}

impl WorkerDeps {
    pub fn from_config(config: &Config) -> Self {
        Self {
            probe: Box::new(RedisProbe::from_config(&config.redis)),
            platforms: PlatformRegistry::builtin(),
            dispatcher: Box::new(|registry: &PlatformRegistry| -> Arc<dyn Dispatcher> {
                Arc::new(LocalDispatcher::new(registry.names()))
            }),
            front_end: Some(HttpServerConfig::from(&config.host)),
            fd_limit: Some(config.fd_limit),
        }
    }
}

/// State owned by one worker process.
pub struct WorkerContext {
    pub worker_id: u32,
    pub sockethub_id: String,
    pub assigned_platforms: Vec<String>,
    pub listeners: Vec<ListenerHandle>,
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
    front_end: Option<FrontEndHandle>,
    phase: WorkerPhase,
}

pub struct WorkerBootstrap {
    worker_id: u32,
    sockethub_id: String,
    assigned_platforms: Vec<String>,
    deps: WorkerDeps,
}

impl WorkerBootstrap {
    pub fn new(
        worker_id: u32,
        sockethub_id: impl Into<String>,
        assigned_platforms: Vec<String>,
        deps: WorkerDeps,
    ) -> Self {
        Self {
            worker_id,
            sockethub_id: sockethub_id.into(),
            assigned_platforms,
            deps,
        }
    }

    /// Run the startup sequence. Each step completes before the next begins.
    pub async fn run(self) -> Result<WorkerContext> {
        let WorkerBootstrap {
            worker_id,
            sockethub_id,
            assigned_platforms,
            deps,
        } = self;

        let mut ctx = WorkerContext::new(worker_id, sockethub_id, assigned_platforms);
        ctx.set_phase(WorkerPhase::Bootstrapping);

        if let Some(target) = deps.fd_limit {
            limits::tune_fd_limit(target);
        }

        info!("Verifying redis connection");
        deps.probe.check_ready().await?;
        info!("Redis check successful");

        let mut wants_dispatcher = false;
        for platform in &ctx.assigned_platforms {
            if platform == DISPATCHER_PLATFORM {
                wants_dispatcher = true;
                continue;
            }
            if ctx.listeners.iter().any(|l| &l.platform == platform) {
                warn!(%platform, "Platform listed twice, keeping the first listener");
                continue;
            }

            debug!(%platform, "Initializing listener");
            let mut instance =
                deps.platforms
                    .create(platform)
                    .map_err(|source| WorkerError::Listener {
                        platform: platform.clone(),
                        source,
                    })?;
            instance
                .init(&ListenerOptions {
                    platform: platform.clone(),
                    sockethub_id: ctx.sockethub_id.clone(),
                })
                .map_err(|source| WorkerError::Listener {
                    platform: platform.clone(),
                    source,
                })?;
            ctx.listeners.push(ListenerHandle {
                platform: platform.clone(),
                instance,
            });
        }

        if wants_dispatcher {
            let dispatcher = (deps.dispatcher)(&deps.platforms);
            dispatcher
                .init(&ctx.assigned_platforms, &ctx.sockethub_id)
                .await?;

            if let Some(config) = deps.front_end {
                let handle = HttpServer::new(config, Arc::clone(&dispatcher), worker_id)
                    .start()
                    .await
                    .map_err(WorkerError::FrontEnd)?;
                ctx.front_end = Some(handle);
            }
            ctx.dispatcher = Some(dispatcher);
            info!(listeners = ctx.listeners.len(), "Finished loading");
        } else {
            info!(
                listeners = ctx.listeners.len(),
                "Finished loading listeners, ready to work"
            );
        }

        ctx.set_phase(WorkerPhase::Ready);
        Ok(ctx)
    }
}

impl WorkerContext {
    pub fn new(worker_id: u32, sockethub_id: impl Into<String>, assigned_platforms: Vec<String>) -> Self {
        Self {
            worker_id,
            sockethub_id: sockethub_id.into(),
            assigned_platforms,
            listeners: Vec::new(),
            dispatcher: None,
            front_end: None,
            phase: WorkerPhase::Idle,
        }
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    fn set_phase(&mut self, phase: WorkerPhase) {
        debug!(from = ?self.phase, to = ?phase, "Worker phase changed");
        self.phase = phase;
    }

    pub fn front_end(&self) -> Option<&FrontEndHandle> {
        self.front_end.as_ref()
    }

    /// Handle control messages until told to stop. Returns the exit code.
    ///
    /// An interrupt, or the supervisor closing the channel, is handled like
    /// [`ControlMessage::Shutdown`].
    pub async fn serve(
        mut self,
        mut control: mpsc::Receiver<ControlMessage>,
        mut interrupt: ShutdownCoordinator,
    ) -> i32 {
        loop {
            tokio::select! {
                message = control.recv() => match message {
                    Some(ControlMessage::Shutdown) => {
                        info!("Shutdown requested by supervisor");
                        return self.finish(&mut interrupt).await;
                    }
                    Some(ControlMessage::Unknown(payload)) => {
                        error!(%payload, "Unexpected message sent to this worker process, ignoring");
                    }
                    None => {
                        warn!("Control channel closed, shutting down");
                        return self.finish(&mut interrupt).await;
                    }
                },
                _ = interrupt.wait() => {
                    info!("Caught interrupt, ending worker session");
                    return self.finish(&mut interrupt).await;
                }
            }
        }
    }

    /// Graceful shutdown, cut short if a forced shutdown is requested.
    async fn finish(&mut self, interrupt: &mut ShutdownCoordinator) -> i32 {
        tokio::select! {
            biased;
            code = self.shutdown() => code,
            _ = interrupt.wait_forced() => {
                warn!("Forced shutdown, skipping remaining cleanup");
                exit_code::FATAL
            }
        }
    }

    /// Fire `shutdown()` on every listener, stop the front-end, await the
    /// dispatcher, exit non-zero.
    ///
    /// There is no natural completion for a worker, so being told to stop is
    /// always reported as [`exit_code::FATAL`].
    pub async fn shutdown(&mut self) -> i32 {
        self.set_phase(WorkerPhase::ShuttingDown);
        info!("Cleaning up listener sessions");
        for listener in &mut self.listeners {
            listener.instance.shutdown();
        }

        // No new client requests once the dispatcher starts tearing down.
        if let Some(front_end) = self.front_end.take() {
            front_end.stop().await;
        }

        if let Some(dispatcher) = &self.dispatcher {
            match dispatcher.shutdown().await {
                Ok(()) => info!("Exiting"),
                Err(e) => error!(error = %e, "Aborting"),
            }
        }

        self.set_phase(WorkerPhase::Stopped);
        exit_code::FATAL
    }
}

/// Forward decoded control frames from `reader` into a channel. The channel
/// closes when the reader reaches EOF or fails.
pub fn spawn_control_reader<R>(reader: R) -> mpsc::Receiver<ControlMessage>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let forward = async move {
        let mut reader = reader;
        loop {
            match MessageFrame::read(&mut reader).await {
                Ok(Some(message)) => {
                    if tx.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Control channel reached EOF");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Control channel failed");
                    break;
                }
            }
        }
    };
    tokio::spawn(forward.in_current_span());
    rx
}

/// Log panics with a backtrace and end the process. Panics are not
/// hard-exit errors, so the supervisor respawns the worker.
pub fn install_panic_hook(worker_id: u32) {
    std::panic::set_hook(Box::new(move |panic| {
        let backtrace = std::backtrace::Backtrace::capture();
        error!(worker = worker_id, "Caught panic: {}\n{}", panic, backtrace);
        std::process::exit(exit_code::CLEAN);
    }));
}

/// Worker process entry point. Returns the process exit code.
pub async fn run(worker_id: u32, sockethub_id: String, config: &Config) -> i32 {
    let span = info_span!("worker", id = worker_id, pid = std::process::id());
    async move {
        install_panic_hook(worker_id);
        let interrupt = ShutdownCoordinator::new();
        if let Err(e) = spawn_signal_listener(interrupt.handle()) {
            warn!(error = %e, "Unable to install signal handlers");
        }

        run_with(
            WorkerBootstrap::new(
                worker_id,
                sockethub_id,
                config.my_platforms().to_vec(),
                WorkerDeps::from_config(config),
            ),
            tokio::io::stdin(),
            interrupt,
        )
        .await
    }
    .instrument(span)
    .await
}

/// Bootstrap, then serve control frames read from `control`. The reader is
/// not touched until bootstrap has succeeded.
pub async fn run_with<R>(bootstrap: WorkerBootstrap, control: R, interrupt: ShutdownCoordinator) -> i32
where
    R: AsyncRead + Unpin + Send + 'static,
{
    info!(sockethub_id = %bootstrap.sockethub_id, "Worker starting");

    let ctx = match bootstrap.run().await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, hard_exit = e.hard_exit(), "Worker bootstrap failed");
            return e.exit_code();
        }
    };

    // Registered only now, so a shutdown never sees half-built listeners.
    let control = spawn_control_reader(control);
    ctx.serve(control, interrupt).await
}

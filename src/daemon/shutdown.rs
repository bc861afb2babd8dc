//! Shutdown signalling shared by the supervisor and worker run loops.
//!
//! The latch has two levels: a graceful request, then a forced one for when
//! the operator interrupts again while the graceful path is still running.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

const GRACEFUL: u8 = 1;
const FORCED: u8 = 2;

/// Owns the shutdown latch and lets a run loop wait on it.
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<u8>>,
    rx: watch::Receiver<u8>,
}

/// Cloneable trigger for a [`ShutdownCoordinator`].
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<u8>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(0);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.tx),
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow() >= GRACEFUL
    }

    pub fn is_forced(&self) -> bool {
        *self.rx.borrow() >= FORCED
    }

    /// Resolves once shutdown has been requested (immediately if it already was).
    pub async fn wait(&mut self) {
        // The sender lives in `self`, so the channel cannot close underneath us.
        let _ = self.rx.wait_for(|level| *level >= GRACEFUL).await;
    }

    /// Resolves once a forced shutdown has been requested.
    pub async fn wait_forced(&mut self) {
        let _ = self.rx.wait_for(|level| *level >= FORCED).await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.raise(GRACEFUL);
    }

    /// Stop waiting for graceful cleanup.
    pub fn force(&self) {
        self.raise(FORCED);
    }

    /// Graceful on the first call, forced on every later one.
    pub fn escalate(&self) {
        let previous = *self.tx.borrow();
        self.raise(if previous >= GRACEFUL { FORCED } else { GRACEFUL });
    }

    fn raise(&self, level: u8) {
        self.tx.send_if_modified(|current| {
            if *current < level {
                *current = level;
                true
            } else {
                false
            }
        });
    }
}

/// Trigger `handle` on SIGINT or SIGTERM (Ctrl+C elsewhere). The first
/// signal requests a graceful shutdown, any further one forces it.
pub fn spawn_signal_listener(handle: ShutdownHandle) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            info!("Received SIGTERM");
                        }
                        _ = sigint.recv() => {
                            info!("Received SIGINT (Ctrl+C)");
                        }
                    }
                    escalate(&handle);
                }
            }
            .in_current_span(),
        );
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(
            async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C");
                    escalate(&handle);
                }
            }
            .in_current_span(),
        );
    }

    Ok(())
}

fn escalate(handle: &ShutdownHandle) {
    if *handle.tx.borrow() >= GRACEFUL {
        warn!("Interrupted again, forcing shutdown");
    }
    handle.escalate();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let mut coordinator = ShutdownCoordinator::new();
        let handle = coordinator.handle();
        assert!(!coordinator.is_triggered());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.shutdown();
        });

        tokio::time::timeout(Duration::from_secs(1), coordinator.wait())
            .await
            .expect("shutdown was not observed");
        assert!(coordinator.is_triggered());
        assert!(!coordinator.is_forced());
    }

    #[tokio::test]
    async fn test_wait_is_immediate_once_triggered() {
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.handle().shutdown();
        coordinator.wait().await;
        coordinator.wait().await;
    }

    #[tokio::test]
    async fn test_escalate_forces_on_second_request() {
        let mut coordinator = ShutdownCoordinator::new();
        let handle = coordinator.handle();

        handle.escalate();
        assert!(coordinator.is_triggered());
        assert!(!coordinator.is_forced());

        handle.escalate();
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_forced())
            .await
            .expect("forced shutdown was not observed");
        assert!(coordinator.is_forced());

        // Never drops back to graceful.
        handle.shutdown();
        assert!(coordinator.is_forced());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_signal_forces_shutdown() {
        let mut coordinator = ShutdownCoordinator::new();
        spawn_signal_listener(coordinator.handle()).unwrap();

        // SAFETY: a handler for SIGTERM is installed above.
        unsafe { libc::raise(libc::SIGTERM) };
        tokio::time::timeout(Duration::from_secs(5), coordinator.wait())
            .await
            .expect("first signal was not observed");
        assert!(!coordinator.is_forced());

        unsafe { libc::raise(libc::SIGTERM) };
        tokio::time::timeout(Duration::from_secs(5), coordinator.wait_forced())
            .await
            .expect("second signal did not force shutdown");
    }
}

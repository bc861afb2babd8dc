//! Platform listeners and the registry that builds them by name.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

/// Reserved platform name: the worker also owns the dispatcher and the
/// front-end transport. Never built as a listener.
pub const DISPATCHER_PLATFORM: &str = "dispatcher";

const DUMMY_INBOX_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("no listener registered for platform '{0}'")]
    UnknownPlatform(String),

    #[error("platform '{platform}' failed to initialize: {reason}")]
    Init { platform: String, reason: String },

    #[error("platform '{0}' is not running")]
    NotRunning(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    pub platform: String,
    pub sockethub_id: String,
}

/// Adapter for one external platform, owned by a single worker.
pub trait Listener: Send {
    fn init(&mut self, options: &ListenerOptions) -> Result<(), PlatformError>;

    /// Begin teardown. Returns without waiting; in-flight work drains on the
    /// listener's own tasks.
    fn shutdown(&mut self);
}

pub type ListenerFactory = Box<dyn Fn() -> Box<dyn Listener> + Send + Sync>;

pub struct ListenerHandle {
    pub platform: String,
    pub instance: Box<dyn Listener>,
}

/// Lookup table of listener factories keyed by platform name.
pub struct PlatformRegistry {
    factories: HashMap<String, ListenerFactory>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the platforms that ship with the daemon.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("dummy", || Box::new(DummyListener::new()));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Listener> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Listener>, PlatformError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PlatformError::UnknownPlatform(name.to_string()))?;
        Ok(factory())
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Test platform: accepts jobs on an inbox and logs them.
pub struct DummyListener {
    platform: String,
    inbox: Option<mpsc::Sender<String>>,
    task: Option<JoinHandle<usize>>,
}

impl DummyListener {
    pub fn new() -> Self {
        Self {
            platform: "dummy".to_string(),
            inbox: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inbox.is_some()
    }

    pub fn submit(&self, job: impl Into<String>) -> Result<(), PlatformError> {
        let inbox = self
            .inbox
            .as_ref()
            .ok_or_else(|| PlatformError::NotRunning(self.platform.clone()))?;
        inbox
            .try_send(job.into())
            .map_err(|_| PlatformError::NotRunning(self.platform.clone()))
    }

    /// Handle of the job loop; resolves to the number of jobs handled.
    pub fn take_task(&mut self) -> Option<JoinHandle<usize>> {
        self.task.take()
    }
}

impl Default for DummyListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for DummyListener {
    fn init(&mut self, options: &ListenerOptions) -> Result<(), PlatformError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| PlatformError::Init {
            platform: options.platform.clone(),
            reason: e.to_string(),
        })?;

        self.platform = options.platform.clone();
        let (tx, mut rx) = mpsc::channel::<String>(DUMMY_INBOX_CAPACITY);
        let platform = self.platform.clone();
        let sockethub_id = options.sockethub_id.clone();

        let jobs = async move {
            let mut handled = 0;
            while let Some(job) = rx.recv().await {
                handled += 1;
                info!(%platform, %sockethub_id, %job, "Job received");
            }
            debug!(%platform, handled, "Listener stopped");
            handled
        };
        self.task = Some(runtime.spawn(jobs.in_current_span()));
        self.inbox = Some(tx);
        Ok(())
    }

    fn shutdown(&mut self) {
        // Dropping the sender lets the job loop drain what is queued, then stop.
        if self.inbox.take().is_some() {
            info!(platform = %self.platform, "Ending listener session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::test_logs::CapturedLogs;

    fn options(platform: &str) -> ListenerOptions {
        ListenerOptions {
            platform: platform.to_string(),
            sockethub_id: "1700000000000".to_string(),
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = PlatformRegistry::builtin();
        assert!(registry.contains("dummy"));
        assert!(!registry.contains(DISPATCHER_PLATFORM));
        assert_eq!(registry.names(), vec!["dummy"]);
    }

    #[test]
    fn test_unknown_platform() {
        let registry = PlatformRegistry::builtin();
        let err = registry.create("smtp").err().unwrap();
        assert!(matches!(err, PlatformError::UnknownPlatform(ref p) if p == "smtp"));
    }

    #[test]
    fn test_dummy_init_requires_runtime() {
        let mut listener = DummyListener::new();
        let err = listener.init(&options("dummy")).unwrap_err();
        assert!(matches!(err, PlatformError::Init { .. }));
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_dummy_drains_queued_jobs_on_shutdown() {
        let mut listener = DummyListener::new();
        listener.init(&options("dummy")).unwrap();
        assert!(listener.is_running());

        listener.submit("ping").unwrap();
        listener.submit("pong").unwrap();
        listener.shutdown();
        assert!(!listener.is_running());
        assert!(matches!(
            listener.submit("late"),
            Err(PlatformError::NotRunning(_))
        ));

        let handled = listener.take_task().unwrap().await.unwrap();
        assert_eq!(handled, 2);
    }

    #[tokio::test]
    async fn test_dummy_job_logs_keep_worker_tag() {
        let (logs, _guard) = CapturedLogs::install();
        let mut listener = DummyListener::new();
        {
            let _span = tracing::info_span!("worker", id = 9).entered();
            listener.init(&options("dummy")).unwrap();
        }

        listener.submit("ping").unwrap();
        listener.shutdown();
        assert_eq!(listener.take_task().unwrap().await.unwrap(), 1);

        let output = logs.contents();
        let line = output
            .lines()
            .find(|l| l.contains("Job received"))
            .unwrap_or_else(|| panic!("no job line in {}", output));
        assert!(line.contains("worker{id=9}"), "{}", line);
    }
}

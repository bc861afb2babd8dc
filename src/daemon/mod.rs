//! Sockethub daemon - supervisor and worker processes
//!
//! The supervisor checks redis, then re-executes its own binary in worker
//! mode `N` times and keeps that many workers alive. Each worker owns the
//! listeners for its platforms and, when asked to, the dispatcher and the
//! HTTP front-end.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │              sockethub (supervisor)        │
//! │  Supervisor │ ProcessLauncher │ signals    │
//! ├────────────────────────────────────────────┤
//! │        stdin: rkyv ControlEnvelope         │
//! ├────────────────────────────────────────────┤
//! │  worker 1: readiness → listeners →         │
//! │            dispatcher + front-end          │
//! └────────────────────────────────────────────┘
//! ```
//!
//! Shutdown flows top-down: interrupt → `Shutdown` to every worker →
//! listeners, front-end, dispatcher → worker exit → no respawn.

pub mod dispatcher;
pub mod limits;
pub mod platform;
pub mod process;
pub mod protocol;
pub mod readiness;
pub mod server;
pub mod shutdown;
pub mod supervisor;
#[cfg(test)]
mod test_logs;
pub mod worker;

pub use dispatcher::{Dispatcher, DispatcherInfo, DispatcherState, LocalDispatcher};
pub use platform::{Listener, ListenerHandle, ListenerOptions, PlatformRegistry};
pub use process::ProcessLauncher;
pub use protocol::{ControlMessage, MessageFrame};
pub use readiness::{ReadinessProbe, RedisProbe};
pub use server::DaemonServer;
pub use shutdown::{ShutdownCoordinator, ShutdownHandle};
pub use supervisor::{Supervisor, SupervisorPhase, WorkerEvent, WorkerHandle, WorkerLauncher};
pub use worker::{WorkerBootstrap, WorkerContext, WorkerDeps, WorkerPhase};

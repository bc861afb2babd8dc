use crate::daemon::dispatcher::DispatcherError;
use crate::daemon::platform::PlatformError;
use crate::daemon::readiness::ReadinessError;
use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes shared by the supervisor and its workers.
///
/// The supervisor reads [`FATAL`](exit_code::FATAL) as "stop adding
/// capacity"; every other code from an unexpected exit leads to a respawn.
pub mod exit_code {
    /// Worker ended without a hard-exit error.
    pub const CLEAN: i32 = 0;
    /// Hard-exit error, or a worker that was told to shut down.
    pub const FATAL: i32 = 1;
    /// The coordination store did not answer the readiness probe.
    pub const DEPENDENCY_UNAVAILABLE: i32 = 2;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that end a worker process during bootstrap.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("redis check failed: {0}")]
    NotReady(#[from] ReadinessError),

    #[error("failed initializing {platform} platform: {source}")]
    Listener {
        platform: String,
        #[source]
        source: PlatformError,
    },

    #[error("dispatcher failed initialization: {0}")]
    Dispatcher(#[from] DispatcherError),

    #[error("unable to start front-end transport: {0}")]
    FrontEnd(#[source] std::io::Error),
}

impl WorkerError {
    /// Hard-exit errors make the supervisor stop respawning.
    pub fn hard_exit(&self) -> bool {
        self.exit_code() == exit_code::FATAL
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotReady(_) => exit_code::DEPENDENCY_UNAVAILABLE,
            Self::Listener { .. } | Self::Dispatcher(_) | Self::FrontEnd(_) => exit_code::FATAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_failure_is_respawnable() {
        let err = WorkerError::NotReady(ReadinessError::UnexpectedReply("-LOADING".into()));
        assert!(!err.hard_exit());
        assert_eq!(err.exit_code(), exit_code::DEPENDENCY_UNAVAILABLE);
        assert_ne!(err.exit_code(), exit_code::FATAL);
    }

    #[test]
    fn listener_failure_is_hard_exit() {
        let err = WorkerError::Listener {
            platform: "xmpp".into(),
            source: PlatformError::UnknownPlatform("xmpp".into()),
        };
        assert!(err.hard_exit());
        assert_eq!(err.exit_code(), exit_code::FATAL);
        assert!(err.to_string().contains("xmpp"));
    }

    #[test]
    fn dispatcher_and_front_end_failures_are_hard_exit() {
        let errors = [
            WorkerError::Dispatcher(DispatcherError::UnsupportedPlatform("irc".into())),
            WorkerError::FrontEnd(std::io::Error::from(std::io::ErrorKind::AddrInUse)),
        ];
        for err in errors {
            assert!(err.hard_exit(), "{}", err);
            assert_eq!(err.exit_code(), exit_code::FATAL);
        }
    }
}

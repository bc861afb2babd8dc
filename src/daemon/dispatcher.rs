//! Dispatcher contract and the in-process dispatcher.
//!
//! The dispatcher sits between the front-end transport and the platform
//! listeners. Routing and validation live behind this trait; the worker only
//! drives its lifecycle.

use super::platform::DISPATCHER_PLATFORM;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error("dispatcher is already {0}")]
    InvalidState(&'static str),

    #[error("platform '{0}' is not available to the dispatcher")]
    UnsupportedPlatform(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatcherState {
    Idle,
    Active,
    Stopped,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Active => "active",
            DispatcherState::Stopped => "stopped",
        }
    }
}

/// Snapshot exposed to the front-end.
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherInfo {
    pub state: DispatcherState,
    pub platforms: Vec<String>,
    pub sockethub_id: Option<String>,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn init(&self, platforms: &[String], sockethub_id: &str) -> Result<(), DispatcherError>;

    async fn shutdown(&self) -> Result<(), DispatcherError>;

    async fn info(&self) -> DispatcherInfo;
}

/// Dispatcher serving the platforms registered in this process.
pub struct LocalDispatcher {
    known: HashSet<String>,
    inner: RwLock<DispatcherInfo>,
}

impl LocalDispatcher {
    pub fn new<I, S>(known_platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known_platforms.into_iter().map(Into::into).collect(),
            inner: RwLock::new(DispatcherInfo {
                state: DispatcherState::Idle,
                platforms: Vec::new(),
                sockethub_id: None,
            }),
        }
    }
}

#[async_trait]
impl Dispatcher for LocalDispatcher {
    async fn init(&self, platforms: &[String], sockethub_id: &str) -> Result<(), DispatcherError> {
        let mut inner = self.inner.write().await;
        if inner.state != DispatcherState::Idle {
            return Err(DispatcherError::InvalidState(inner.state.as_str()));
        }

        let mut served = Vec::with_capacity(platforms.len());
        for platform in platforms {
            if platform == DISPATCHER_PLATFORM {
                continue;
            }
            if !self.known.contains(platform) {
                return Err(DispatcherError::UnsupportedPlatform(platform.clone()));
            }
            served.push(platform.clone());
        }

        info!(platforms = ?served, "Dispatcher initialized");
        inner.state = DispatcherState::Active;
        inner.platforms = served;
        inner.sockethub_id = Some(sockethub_id.to_string());
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DispatcherError> {
        let mut inner = self.inner.write().await;
        if inner.state == DispatcherState::Stopped {
            return Err(DispatcherError::InvalidState("stopped"));
        }
        info!("Cleaning up dispatcher sessions");
        inner.state = DispatcherState::Stopped;
        Ok(())
    }

    async fn info(&self) -> DispatcherInfo {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platforms(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_init_skips_reserved_name() {
        let dispatcher = LocalDispatcher::new(["dummy"]);
        dispatcher
            .init(&platforms(&["dummy", "dispatcher"]), "42")
            .await
            .unwrap();

        let info = dispatcher.info().await;
        assert_eq!(info.state, DispatcherState::Active);
        assert_eq!(info.platforms, vec!["dummy"]);
        assert_eq!(info.sockethub_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_init_rejects_unknown_platform() {
        let dispatcher = LocalDispatcher::new(["dummy"]);
        let err = dispatcher
            .init(&platforms(&["dummy", "twitter"]), "42")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatcherError::UnsupportedPlatform(ref p) if p == "twitter"));
        assert_eq!(dispatcher.info().await.state, DispatcherState::Idle);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let dispatcher = LocalDispatcher::new(["dummy"]);
        dispatcher.init(&platforms(&["dummy"]), "42").await.unwrap();
        assert!(dispatcher.init(&platforms(&["dummy"]), "42").await.is_err());

        dispatcher.shutdown().await.unwrap();
        assert_eq!(dispatcher.info().await.state, DispatcherState::Stopped);
        assert!(dispatcher.shutdown().await.is_err());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&DispatcherState::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }
}

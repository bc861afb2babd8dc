//! HTTP front-end bound to a worker's dispatcher.
//!
//! Only the lifecycle lives here; the client wire protocol belongs to the
//! dispatcher.

use crate::config::HostConfig;
use crate::daemon::dispatcher::{Dispatcher, DispatcherInfo};
use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: 10550,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl From<&HostConfig> for HttpServerConfig {
    fn from(host: &HostConfig) -> Self {
        Self {
            port: host.port,
            host: host.bind.clone(),
        }
    }
}

struct FrontEndState {
    dispatcher: Arc<dyn Dispatcher>,
    worker_id: u32,
}

/// Front-end transport for one worker.
pub struct HttpServer {
    config: HttpServerConfig,
    state: Arc<FrontEndState>,
}

/// Running server; dropping it leaves the server running until the process exits.
pub struct FrontEndHandle {
    local_addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, dispatcher: Arc<dyn Dispatcher>, worker_id: u32) -> Self {
        Self {
            config,
            state: Arc::new(FrontEndState {
                dispatcher,
                worker_id,
            }),
        }
    }

    /// Bind and serve in the background.
    pub async fn start(self) -> std::io::Result<FrontEndHandle> {
        let app = self.build_router();
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Front-end listening on http://{}", local_addr);

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await
        });

        Ok(FrontEndHandle {
            local_addr,
            stop,
            task,
        })
    }

    fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(health_handler))
            .route("/sockethub", get(sockethub_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }
}

impl FrontEndHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        match self.task.await {
            Ok(Ok(())) => info!("Front-end stopped"),
            Ok(Err(e)) => warn!(error = %e, "Front-end stopped with error"),
            Err(e) => warn!(error = %e, "Front-end task failed"),
        }
    }
}

async fn health_handler(State(state): State<Arc<FrontEndState>>) -> Json<Value> {
    let info = state.dispatcher.info().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "worker": state.worker_id,
        "dispatcher": info.state,
    }))
}

async fn sockethub_handler(State(state): State<Arc<FrontEndState>>) -> Json<DispatcherInfo> {
    Json(state.dispatcher.info().await)
}

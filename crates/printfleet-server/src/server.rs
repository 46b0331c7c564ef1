//! `ActionServer`: axum HTTP surface and WebSocket action endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use printfleet_core::SessionId;
use printfleet_machines::{ConnectionRegistry, ConnectionState};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::actions::{self, ClientState, FleetContext};
use crate::config::ServerConfig;
use crate::dispatch::ActionRegistry;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::{SessionContext, SessionOptions, SessionRegistry, run_session};

type SessionFactory<S> = Arc<dyn Fn(&SessionId) -> S + Send + Sync>;

/// Shared state of the axum handlers.
pub struct AppState<S> {
    /// Registered actions.
    pub actions: Arc<ActionRegistry<S>>,
    /// Open sessions.
    pub sessions: Arc<SessionRegistry<S>>,
    factory: SessionFactory<S>,
    /// Fleet reported by `/health`, when attached.
    pub machines: Option<Arc<ConnectionRegistry>>,
    /// Server settings.
    pub config: ServerConfig,
    /// When the server was built.
    pub start_time: Instant,
    /// Renders `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Cancels every session on shutdown.
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            actions: Arc::clone(&self.actions),
            sessions: Arc::clone(&self.sessions),
            factory: Arc::clone(&self.factory),
            machines: self.machines.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

/// Serves an [`ActionRegistry`] to WebSocket clients whose per-session
/// state `S` is built by a factory.
pub struct ActionServer<S> {
    state: AppState<S>,
}

impl<S: Send + Sync + 'static> ActionServer<S> {
    /// Server for `actions`. Handler runs are bounded by the configured
    /// handler timeout.
    pub fn new(
        config: ServerConfig,
        actions: ActionRegistry<S>,
        factory: impl Fn(&SessionId) -> S + Send + Sync + 'static,
    ) -> Self {
        let actions = actions.with_handler_timeout(config.handler_timeout);
        Self {
            state: AppState {
                actions: Arc::new(actions),
                sessions: Arc::new(SessionRegistry::new()),
                factory: Arc::new(factory),
                machines: None,
                config,
                start_time: Instant::now(),
                metrics: None,
                shutdown: Arc::new(ShutdownCoordinator::new()),
            },
        }
    }

    /// Report fleet counts on `/health`.
    #[must_use]
    pub fn with_machines(mut self, machines: Arc<ConnectionRegistry>) -> Self {
        self.state.machines = Some(machines);
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Share a coordinator with the caller's background tasks.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownCoordinator>) -> Self {
        self.state.shutdown = shutdown;
        self
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let ws_path = self.state.config.ws_path.clone();
        Router::new()
            .route("/health", get(health_handler::<S>))
            .route("/metrics", get(metrics_handler::<S>))
            .route(&ws_path, get(ws_handler::<S>))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown starts.
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.state.config.bind_address()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(error) = served {
                error!(%error, "server stopped with error");
            }
        });
        info!(%addr, ws_path = %self.state.config.ws_path, "server listening");
        Ok((addr, handle))
    }

    /// Open sessions.
    pub fn sessions(&self) -> &Arc<SessionRegistry<S>> {
        &self.state.sessions
    }

    /// Registered actions.
    pub fn actions(&self) -> &Arc<ActionRegistry<S>> {
        &self.state.actions
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server settings.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// Server exposing the full fleet action set over `ctx`.
pub fn fleet_server(config: ServerConfig, ctx: &FleetContext) -> ActionServer<ClientState> {
    let mut registry = ActionRegistry::new();
    let registered = actions::register_all(&mut registry, ctx);
    debug!(registered, "fleet actions registered");
    ActionServer::new(config, registry, |_| ClientState::default()).with_machines(Arc::clone(&ctx.machines))
}

/// GET /health
async fn health_handler<S: Send + Sync + 'static>(State(state): State<AppState<S>>) -> Json<HealthResponse> {
    let (machines, connected) = state.machines.as_ref().map_or((0, 0), |machines| {
        let snapshot = machines.snapshot();
        let connected = snapshot
            .iter()
            .filter(|machine| machine.connection_state() == ConnectionState::Connected)
            .count();
        (snapshot.len(), connected)
    });
    Json(health::health_check(state.start_time, state.sessions.len(), machines, connected))
}

/// GET /metrics
async fn metrics_handler<S: Send + Sync + 'static>(State(state): State<AppState<S>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// GET {ws_path}
async fn ws_handler<S: Send + Sync + 'static>(
    State(state): State<AppState<S>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(%rejection, "rejected non-upgrade request");
            return (StatusCode::BAD_REQUEST, "WebSocket upgrade required").into_response();
        }
    };
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let id = SessionId::new();
    let session_state = (state.factory)(&id);
    let ctx = SessionContext {
        actions: Arc::clone(&state.actions),
        sessions: Arc::clone(&state.sessions),
        options: SessionOptions {
            outbound_queue_capacity: state.config.outbound_queue_capacity,
            heartbeat_interval: state.config.heartbeat_interval,
        },
        shutdown: state.shutdown.token(),
    };
    upgrade
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_session(socket, id, session_state, ctx))
}

//! # printfleet-server
//!
//! WebSocket action server for the fleet hub.
//!
//! - JSON request/response envelopes and the typed action registry ([`dispatch`])
//! - Per-client sessions with bounded outbound queues ([`websocket`])
//! - The fleet action set and state push bridge ([`actions`])
//! - Axum router with `/health`, `/metrics`, and the WebSocket route ([`server`])
//! - Graceful shutdown coordination ([`shutdown`])

#![deny(unsafe_code)]

pub mod actions;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use actions::{ClientState, FleetContext, StateDetail, register_all, spawn_state_bridge};
pub use config::ServerConfig;
pub use dispatch::{ActionRegistry, ActionResponse, ActionResult, DispatchError, Reply, RequestEnvelope, ResponseEnvelope};
pub use server::{ActionServer, AppState, fleet_server};
pub use shutdown::ShutdownCoordinator;
pub use websocket::{Session, SessionRegistry};

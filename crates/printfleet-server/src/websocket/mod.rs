//! WebSocket transport: sessions, message handling, and push fan-out.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod session;

pub use broadcast::SessionRegistry;
pub use connection::Session;
pub use handler::handle_message;
pub use session::{SessionContext, SessionOptions, run_session};

//! # printfleet-core
//!
//! Foundation types shared by every printfleet crate.
//!
//! - Branded ID newtypes ([`ids`])
//! - Change tracking over observed values ([`tracked`])
//! - Ring-buffered fan-out with drop-oldest subscriber queues ([`hub`])
//! - The machine state model: status, capabilities, diagnostic messages,
//!   the pure state reducer, and operation results ([`machine`])

#![deny(unsafe_code)]

#[macro_use]
mod flags;

pub mod hub;
pub mod ids;
pub mod machine;
pub mod tracked;

pub use hub::{BroadcastHub, Subscription, Unsubscriber};
pub use ids::{MachineId, SessionId};

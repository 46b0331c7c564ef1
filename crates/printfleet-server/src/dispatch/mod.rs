//! Action dispatch: wire envelopes, the action registry, and result shaping.

pub mod envelope;
pub mod errors;
pub mod registry;
pub mod result;

pub use envelope::{RequestEnvelope, ResponseEnvelope};
pub use errors::DispatchError;
pub use registry::{ActionRegistry, DEFAULT_HANDLER_TIMEOUT};
pub use result::{ActionResponse, ActionResult, Reply, to_data};

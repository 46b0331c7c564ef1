//! Action results.
//!
//! Every response `Data` object carries `IsSuccess` and `FailureReason`.
//! Handlers return any serializable type implementing [`ActionResult`]; the
//! concrete type is serialized, so its extra fields reach the client.

use printfleet_core::machine::MachineOperationResult;
use serde::Serialize;
use serde_json::{Map, Value};

/// A handler result.
pub trait ActionResult: Serialize + Send + 'static {
    /// Stamped as `IsSuccess`.
    fn is_success(&self) -> bool;

    /// Stamped as `FailureReason`.
    fn failure_reason(&self) -> Option<String> {
        None
    }
}

/// Serialize `result` and stamp `IsSuccess` and `FailureReason` onto it.
/// A result that does not serialize to an object is nested under `Value`.
/// Null fields are omitted, so `FailureReason` is absent on success.
pub fn to_data<R: ActionResult>(result: &R) -> Result<Value, serde_json::Error> {
    let mut object = match serde_json::to_value(result)? {
        Value::Object(object) => object,
        Value::Null => Map::new(),
        other => {
            let mut object = Map::new();
            let _ = object.insert("Value".into(), other);
            object
        }
    };
    object.retain(|_, value| !value.is_null());
    let _ = object.insert("IsSuccess".into(), Value::Bool(result.is_success()));
    let _ = object.remove("FailureReason");
    if let Some(reason) = result.failure_reason() {
        let _ = object.insert("FailureReason".into(), Value::String(reason));
    }
    Ok(Value::Object(object))
}

/// Plain success or failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionResponse {
    /// Whether the action succeeded.
    pub is_success: bool,
    /// Why it failed.
    pub failure_reason: Option<String>,
}

impl ActionResponse {
    /// Success.
    pub fn success() -> Self {
        Self {
            is_success: true,
            failure_reason: None,
        }
    }

    /// Failure with `reason`.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            is_success: false,
            failure_reason: Some(reason.into()),
        }
    }
}

impl ActionResult for ActionResponse {
    fn is_success(&self) -> bool {
        self.is_success
    }

    fn failure_reason(&self) -> Option<String> {
        self.failure_reason.clone()
    }
}

impl ActionResult for MachineOperationResult {
    fn is_success(&self) -> bool {
        self.is_success
    }

    fn failure_reason(&self) -> Option<String> {
        MachineOperationResult::failure_reason(self)
    }
}

/// Either a typed result or a plain failure, e.g. for actions that first
/// resolve a machine by id.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Reply<R> {
    /// The handler's result.
    Done(R),
    /// A failure before the handler produced a result.
    Failed(ActionResponse),
}

impl<R> Reply<R> {
    /// Failure with `reason`.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failed(ActionResponse::failure(reason))
    }
}

impl<R: ActionResult> ActionResult for Reply<R> {
    fn is_success(&self) -> bool {
        match self {
            Self::Done(result) => result.is_success(),
            Self::Failed(response) => response.is_success,
        }
    }

    fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Done(result) => result.failure_reason(),
            Self::Failed(response) => response.failure_reason.clone(),
        }
    }
}

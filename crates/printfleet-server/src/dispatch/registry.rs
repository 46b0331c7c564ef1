//! Action registry and dispatch.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::envelope::{RequestEnvelope, ResponseEnvelope};
use super::errors::DispatchError;
use super::result::{ActionResult, to_data};
use crate::metrics::{ACTION_DURATION_SECONDS, ACTION_ERRORS_TOTAL, ACTION_REQUESTS_TOTAL};
use crate::websocket::connection::Session;

/// Default handler timeout.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

type HandlerFuture = BoxFuture<'static, Result<Value, DispatchError>>;
type NiladicFn<S> = dyn Fn(Arc<Session<S>>) -> HandlerFuture + Send + Sync;
type PayloadFn<S> = dyn Fn(Arc<Session<S>>, Value) -> Result<HandlerFuture, serde_json::Error> + Send + Sync;

/// A registered handler.
enum ActionHandler<S> {
    Niladic(Box<NiladicFn<S>>),
    WithPayload {
        payload_type: &'static str,
        handler: Box<PayloadFn<S>>,
    },
}

/// Named actions served to sessions whose extension state is `S`.
pub struct ActionRegistry<S> {
    actions: HashMap<String, ActionHandler<S>>,
    handler_timeout: Duration,
}

impl<S: Send + Sync + 'static> ActionRegistry<S> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Bound every handler run by `timeout`.
    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    fn insert(&mut self, name: &str, handler: ActionHandler<S>) -> bool {
        if self.actions.contains_key(name) {
            warn!(action = name, "action already registered");
            return false;
        }
        let _ = self.actions.insert(name.to_owned(), handler);
        true
    }

    /// Register a handler taking no payload. Returns `false` and keeps the
    /// first registration when `name` is taken.
    pub fn map_action<F, Fut, R>(&mut self, name: &str, handler: F) -> bool
    where
        F: Fn(Arc<Session<S>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, DispatchError>> + Send + 'static,
        R: ActionResult,
    {
        let erased = move |session: Arc<Session<S>>| -> HandlerFuture {
            let fut = handler(session);
            async move { Ok(to_data(&fut.await?)?) }.boxed()
        };
        self.insert(name, ActionHandler::Niladic(Box::new(erased)))
    }

    /// Register a handler taking a `P` payload from `Data`.
    pub fn map_action_with<P, F, Fut, R>(&mut self, name: &str, handler: F) -> bool
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(Arc<Session<S>>, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, DispatchError>> + Send + 'static,
        R: ActionResult,
    {
        let erased = move |session: Arc<Session<S>>, data: Value| -> Result<HandlerFuture, serde_json::Error> {
            let payload: P = serde_json::from_value(data)?;
            let fut = handler(session, payload);
            Ok(async move { Ok(to_data(&fut.await?)?) }.boxed())
        };
        self.insert(
            name,
            ActionHandler::WithPayload {
                payload_type: std::any::type_name::<P>(),
                handler: Box::new(erased),
            },
        )
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Payload type name of `name`, `None` for unknown or niladic actions.
    pub fn payload_type(&self, name: &str) -> Option<&'static str> {
        match self.actions.get(name)? {
            ActionHandler::Niladic(_) => None,
            ActionHandler::WithPayload { payload_type, .. } => Some(payload_type),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no action is registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run the handler for `request` on behalf of `session`.
    ///
    /// Returns the response envelope, or why there is none. Handler errors,
    /// panics, and timeouts are contained here.
    pub async fn dispatch(
        &self,
        session: &Arc<Session<S>>,
        request: RequestEnvelope,
    ) -> Result<ResponseEnvelope<Value>, DispatchError> {
        let RequestEnvelope {
            action,
            data,
            response_message_id,
        } = request;
        counter!(ACTION_REQUESTS_TOTAL, "action" => action.clone()).increment(1);

        let result = self.run(session, &action, data, response_message_id.clone()).await;
        match result {
            Ok(data) => Ok(ResponseEnvelope::new(action, data).in_reply_to(response_message_id)),
            Err(err) => {
                counter!(ACTION_ERRORS_TOTAL, "action" => action, "error_type" => err.kind()).increment(1);
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        session: &Arc<Session<S>>,
        action: &str,
        data: Option<Value>,
        message_id: Option<String>,
    ) -> Result<Value, DispatchError> {
        let handler = self
            .actions
            .get(action)
            .ok_or_else(|| DispatchError::UnknownAction(action.to_owned()))?;

        let fut = match handler {
            ActionHandler::Niladic(handler) => handler(Arc::clone(session)),
            ActionHandler::WithPayload { handler, .. } => {
                let data = data.ok_or_else(|| DispatchError::MissingPayload(action.to_owned()))?;
                handler(Arc::clone(session), data).map_err(|e| DispatchError::MalformedPayload {
                    action: action.to_owned(),
                    message_id,
                    reason: e.to_string(),
                })?
            }
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.handler_timeout, AssertUnwindSafe(fut).catch_unwind()).await;
        let elapsed = start.elapsed();
        histogram!(ACTION_DURATION_SECONDS, "action" => action.to_owned()).record(elapsed.as_secs_f64());
        if elapsed.as_secs() >= 5 {
            warn!(action, duration_secs = elapsed.as_secs_f64(), "slow action");
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DispatchError::Panicked),
            Err(_) => Err(DispatchError::Timeout(self.handler_timeout)),
        }
    }
}

impl<S: Send + Sync + 'static> Default for ActionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ──

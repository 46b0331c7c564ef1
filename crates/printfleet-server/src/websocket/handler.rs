//! Incoming text frame handling.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use super::connection::Session;
use crate::dispatch::{ActionRegistry, ActionResponse, DispatchError, RequestEnvelope, ResponseEnvelope, to_data};

/// Handle one text frame and return the text to send back, if any.
///
/// Only a successful handler run or an undeserializable payload produces a
/// reply. Everything else is logged and dropped so the session stays usable.
#[instrument(skip_all, fields(session_id = %session.id(), action))]
pub async fn handle_message<S: Send + Sync + 'static>(
    text: &str,
    actions: &ActionRegistry<S>,
    session: &Arc<Session<S>>,
) -> Option<String> {
    let request = match RequestEnvelope::parse(text) {
        Ok(request) => request,
        Err(error) => {
            warn!(%error, "dropping unparseable message");
            return None;
        }
    };
    let _ = tracing::Span::current().record("action", request.action.as_str());
    debug!(message_id = ?request.response_message_id, "dispatching action");

    let envelope = match actions.dispatch(session, request).await {
        Ok(envelope) => envelope,
        Err(error @ DispatchError::MalformedPayload { .. }) => {
            warn!(%error, "payload failed to deserialize");
            let reason = error.to_string();
            let DispatchError::MalformedPayload { action, message_id, .. } = error else {
                return None;
            };
            return failure_envelope(action, message_id, reason);
        }
        Err(DispatchError::UnknownAction(action)) => {
            warn!(available = ?actions.names(), "unknown action '{action}'");
            return None;
        }
        Err(DispatchError::MissingPayload(_)) => {
            warn!("action requires a payload but none was given");
            return None;
        }
        Err(error) => {
            error!(%error, kind = error.kind(), "action failed");
            return None;
        }
    };

    match envelope.to_text() {
        Ok(text) => Some(text),
        Err(error) => {
            error!(%error, "failed to serialize response");
            None
        }
    }
}

fn failure_envelope(action: String, message_id: Option<String>, reason: String) -> Option<String> {
    let data: Value = match to_data(&ActionResponse::failure(reason)) {
        Ok(data) => data,
        Err(error) => {
            error!(%error, "failed to serialize failure response");
            return None;
        }
    };
    ResponseEnvelope::new(action, data)
        .in_reply_to(message_id)
        .to_text()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use printfleet_core::SessionId;
    use serde::Deserialize;
    use tokio::sync::mpsc;

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Echo {
        #[allow(dead_code)]
        value: u32,
    }

    fn fixture() -> (ActionRegistry<()>, Arc<Session<()>>) {
        let mut actions = ActionRegistry::new();
        assert!(actions.map_action("ping", |_| async { Ok(ActionResponse::success()) }));
        assert!(actions.map_action_with::<Echo, _, _, _>("echo", |_, _| async {
            Ok(ActionResponse::success())
        }));
        let (tx, _rx) = mpsc::channel(4);
        (actions, Arc::new(Session::new(SessionId::new(), tx, ())))
    }

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn success_replies_with_message_id() {
        let (actions, session) = fixture();
        let reply = handle_message(r#"{"Action":"ping","ResponseMessageID":"m1"}"#, &actions, &session)
            .await
            .unwrap();
        let value = parse(&reply);
        assert_eq!(value["MessageID"], "m1");
        assert_eq!(value["Topic"], "ping");
        assert_eq!(value["Data"]["IsSuccess"], true);
    }

    #[tokio::test]
    async fn protocol_errors_are_dropped() {
        let (actions, session) = fixture();
        for text in ["{", r#"{"Action":""}"#, r#"{"Action":"nope"}"#, r#"{"Action":"echo"}"#] {
            assert!(handle_message(text, &actions, &session).await.is_none(), "{text}");
        }
    }

    #[tokio::test]
    async fn malformed_payload_gets_failure_envelope() {
        let (actions, session) = fixture();
        let reply = handle_message(
            r#"{"Action":"echo","Data":{"Value":"x"},"ResponseMessageID":"m2"}"#,
            &actions,
            &session,
        )
        .await
        .unwrap();
        let value = parse(&reply);
        assert_eq!(value["Topic"], "echo");
        assert_eq!(value["MessageID"], "m2");
        assert_eq!(value["Data"]["IsSuccess"], false);
        assert!(
            value["Data"]["FailureReason"]
                .as_str()
                .unwrap()
                .starts_with("Failed to Deserialize; ")
        );
    }

    #[tokio::test]
    async fn dropped_messages_are_logged() {
        let (logs, _guard) = printfleet_logging::capture_logs();
        let (actions, session) = fixture();
        let _ = handle_message(r#"{"Action":"nope"}"#, &actions, &session).await;
        let _ = handle_message(r#"{"Action":"echo"}"#, &actions, &session).await;

        assert!(logs.has_event(printfleet_logging::LogLevel::Warn, "unknown action 'nope'"));
        assert!(logs.has_event(printfleet_logging::LogLevel::Warn, "requires a payload"));
    }
}

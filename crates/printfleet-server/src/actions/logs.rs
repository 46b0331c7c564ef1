//! Log subscription and history actions.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use printfleet_core::Subscription;
use printfleet_logging::{LogEntry, LogLevel};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{ClientState, FleetContext, LOG_HISTORY, LOG_SUBSCRIBE, LOG_UNSUBSCRIBE, LOGS};
use crate::dispatch::{ActionRegistry, ActionResponse, ActionResult, Reply, ResponseEnvelope};
use crate::websocket::Session;

/// Payload of `log/subscribe`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeToLogs {
    /// Minimum time between two `logs` pushes.
    pub min_interval_ms: u64,
}

/// Payload of `log/history`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogHistoryQuery {
    /// Most entries to return, newest kept. Must be at least 1.
    pub max: i64,
    /// Only entries strictly before this time.
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    /// Only entries at or after this time.
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
    /// Lowest level returned.
    pub min_level: LogLevel,
}

/// Reply of `log/history`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogHistory {
    /// Matching entries, oldest first.
    pub entries: Vec<LogEntry>,
}

impl ActionResult for LogHistory {
    fn is_success(&self) -> bool {
        true
    }
}

/// Batches a session's log subscription onto the `logs` topic.
pub struct LogPump {
    interval: watch::Sender<Duration>,
    task: JoinHandle<()>,
}

impl LogPump {
    /// Start pumping `subscription` to `session`. Stops when the session
    /// closes or the pump is dropped.
    pub fn spawn(
        session: Weak<Session<ClientState>>,
        closed: CancellationToken,
        subscription: Subscription<LogEntry>,
        min_interval: Duration,
    ) -> Self {
        let (interval, rx) = watch::channel(min_interval);
        let task = tokio::spawn(pump(session, closed, subscription, rx));
        Self { interval, task }
    }

    /// Change the minimum time between pushes.
    pub fn set_interval(&self, min_interval: Duration) {
        let _ = self.interval.send_replace(min_interval);
    }

    /// Minimum time between pushes.
    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Whether the pump task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LogPump {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for LogPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPump")
            .field("interval", &self.interval())
            .field("finished", &self.is_finished())
            .finish()
    }
}

async fn pump(
    session: Weak<Session<ClientState>>,
    closed: CancellationToken,
    subscription: Subscription<LogEntry>,
    mut interval: watch::Receiver<Duration>,
) {
    let mut pending: Vec<LogEntry> = Vec::new();
    let mut next_send = Instant::now();
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            entry = subscription.recv() => match entry {
                Some(entry) => pending.push(entry),
                None => break,
            },
            changed = interval.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = tokio::time::sleep_until(next_send), if !pending.is_empty() => {}
        }

        if pending.is_empty() || Instant::now() < next_send {
            continue;
        }
        let Some(session) = session.upgrade() else { break };
        let batch = std::mem::take(&mut pending);
        let _ = session.send_envelope(&ResponseEnvelope::new(LOGS, &batch));
        trace!(count = batch.len(), "log batch sent");
        next_send = Instant::now() + *interval.borrow();
    }
    subscription.unsubscribe();
}

fn subscribe(ctx: &FleetContext, session: &Arc<Session<ClientState>>, payload: &SubscribeToLogs) -> ActionResponse {
    let min_interval = Duration::from_millis(payload.min_interval_ms);
    let mut slot = session.state().log_pump().lock();
    match slot.as_ref() {
        Some(pump) if !pump.is_finished() => pump.set_interval(min_interval),
        _ => {
            *slot = Some(LogPump::spawn(
                Arc::downgrade(session),
                session.closed_token(),
                ctx.logs.subscribe(ctx.log_queue_capacity),
                min_interval,
            ));
        }
    }
    ActionResponse::success()
}

/// Entries of `history` matching `query`, oldest first.
pub fn query_history(history: impl Iterator<Item = LogEntry>, query: &LogHistoryQuery) -> Reply<LogHistory> {
    if query.max < 1 {
        return Reply::failure("Max count must be greater than zero.");
    }
    let matching: Vec<LogEntry> = history
        .filter(|entry| entry.level >= query.min_level)
        .filter(|entry| query.after.is_none_or(|after| entry.time >= after))
        .filter(|entry| query.before.is_none_or(|before| entry.time < before))
        .collect();
    let skip = matching.len().saturating_sub(usize::try_from(query.max).unwrap_or(usize::MAX));
    Reply::Done(LogHistory {
        entries: matching.into_iter().skip(skip).collect(),
    })
}

pub(super) fn register(actions: &mut ActionRegistry<ClientState>, ctx: &FleetContext) -> usize {
    let mut registered = 0;

    let subscribe_ctx = ctx.clone();
    registered += usize::from(actions.map_action_with(LOG_SUBSCRIBE, move |session, payload: SubscribeToLogs| {
        let response = subscribe(&subscribe_ctx, &session, &payload);
        async move { Ok(response) }
    }));

    registered += usize::from(actions.map_action(LOG_UNSUBSCRIBE, |session| {
        let pump = session.state().log_pump().lock().take();
        drop(pump);
        async { Ok(ActionResponse::success()) }
    }));

    let logs = Arc::clone(&ctx.logs);
    registered += usize::from(actions.map_action_with(LOG_HISTORY, move |_, query: LogHistoryQuery| {
        let reply = query_history(logs.entries(), &query);
        async move { Ok(reply) }
    }));

    registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use printfleet_core::SessionId;
    use tokio::sync::mpsc;

    fn entry(level: LogLevel, message: &str, time: DateTime<Utc>) -> LogEntry {
        LogEntry {
            time,
            ..LogEntry::new(level, "test", message)
        }
    }

    fn query(max: i64) -> LogHistoryQuery {
        LogHistoryQuery {
            max,
            before: None,
            after: None,
            min_level: LogLevel::Trace,
        }
    }

    fn messages(reply: Reply<LogHistory>) -> Vec<String> {
        match reply {
            Reply::Done(history) => history.entries.into_iter().map(|e| e.message).collect(),
            Reply::Failed(response) => panic!("unexpected failure: {response:?}"),
        }
    }

    #[test]
    fn max_must_be_positive() {
        let reply = query_history(std::iter::empty(), &query(0));
        assert!(!reply.is_success());
        assert_eq!(
            reply.failure_reason().as_deref(),
            Some("Max count must be greater than zero.")
        );
    }

    #[test]
    fn keeps_last_max_matching() {
        let now = Utc::now();
        let history = vec![
            entry(LogLevel::Info, "a", now),
            entry(LogLevel::Debug, "b", now),
            entry(LogLevel::Warn, "c", now),
            entry(LogLevel::Error, "d", now),
        ];
        let q = LogHistoryQuery {
            min_level: LogLevel::Info,
            ..query(2)
        };
        assert_eq!(messages(query_history(history.into_iter(), &q)), ["c", "d"]);
    }

    #[test]
    fn time_window_is_half_open() {
        let t0 = Utc::now();
        let t1 = t0 + TimeDelta::seconds(1);
        let t2 = t0 + TimeDelta::seconds(2);
        let history = vec![
            entry(LogLevel::Info, "t0", t0),
            entry(LogLevel::Info, "t1", t1),
            entry(LogLevel::Info, "t2", t2),
        ];
        let q = LogHistoryQuery {
            after: Some(t1),
            before: Some(t2),
            ..query(10)
        };
        assert_eq!(messages(query_history(history.into_iter(), &q)), ["t1"]);
    }

    #[tokio::test]
    async fn pump_batches_and_stops_on_close() {
        let hub = Arc::new(printfleet_core::BroadcastHub::new(16));
        let (tx, mut rx) = mpsc::channel(16);
        let session = Arc::new(Session::new(SessionId::new(), tx, ClientState::default()));
        let pump = LogPump::spawn(
            Arc::downgrade(&session),
            session.closed_token(),
            hub.subscribe(16),
            Duration::from_millis(200),
        );

        hub.publish(LogEntry::new(LogLevel::Info, "test", "first"));
        let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["Topic"], LOGS);
        assert_eq!(value["Data"][0]["Message"], "first");

        hub.publish(LogEntry::new(LogLevel::Info, "test", "second"));
        hub.publish(LogEntry::new(LogLevel::Info, "test", "third"));
        let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["Data"].as_array().unwrap().len(), 2);

        session.close();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !pump.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(hub.subscriber_count(), 0);
    }
}

//! Fan-out of server pushes to connected sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use printfleet_core::SessionId;
use serde::Serialize;
use tracing::{trace, warn};

use super::connection::Session;
use crate::dispatch::ResponseEnvelope;

/// Live sessions by ID.
pub struct SessionRegistry<S> {
    sessions: RwLock<HashMap<SessionId, Arc<Session<S>>>>,
}

impl<S> SessionRegistry<S> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Track `session` under its id.
    pub fn insert(&self, session: Arc<Session<S>>) {
        let _ = self.sessions.write().insert(session.id().clone(), session);
    }

    /// Stop tracking a session.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session<S>>> {
        self.sessions.write().remove(id)
    }

    /// Session with `id`.
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session<S>>> {
        self.sessions.read().get(id).cloned()
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is open.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Sessions at this instant.
    pub fn snapshot(&self) -> Vec<Arc<Session<S>>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Serialize `envelope` once and enqueue it on every session in
    /// `targets`, in order. Returns how many sessions accepted it.
    pub fn broadcast<'a, T, I>(&self, envelope: &ResponseEnvelope<T>, targets: I) -> usize
    where
        T: Serialize,
        I: IntoIterator<Item = &'a Arc<Session<S>>>,
        S: 'a,
    {
        let text: Arc<str> = match envelope.to_text() {
            Ok(text) => text.into(),
            Err(error) => {
                warn!(topic = %envelope.topic, %error, "failed to serialize push");
                return 0;
            }
        };
        let delivered = targets
            .into_iter()
            .filter(|session| session.send(Arc::clone(&text)))
            .count();
        trace!(topic = %envelope.topic, delivered, "push fanned out");
        delivered
    }

    /// Push to every live session.
    pub fn broadcast_all<T: Serialize>(&self, envelope: &ResponseEnvelope<T>) -> usize {
        let sessions = self.snapshot();
        self.broadcast(envelope, &sessions)
    }
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn session(id: &str, capacity: usize) -> (Arc<Session<()>>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Session::new(SessionId::from(id), tx, ())), rx)
    }

    #[test]
    fn insert_get_remove() {
        let registry = SessionRegistry::new();
        let (a, _rx) = session("a", 4);
        registry.insert(Arc::clone(&a));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&SessionId::from("a")).is_some());
        assert!(registry.remove(&SessionId::from("a")).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_only_targets() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = session("a", 4);
        let (b, mut rx_b) = session("b", 4);
        registry.insert(Arc::clone(&a));
        registry.insert(Arc::clone(&b));

        let delivered = registry.broadcast(&ResponseEnvelope::new("t", json!({"N": 1})), [&a]);
        assert_eq!(delivered, 1);
        assert!(rx_a.recv().await.unwrap().contains("\"Topic\":\"t\""));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_session_does_not_block_others() {
        let registry = SessionRegistry::new();
        let (slow, _rx_slow) = session("slow", 1);
        let (fast, mut rx_fast) = session("fast", 8);
        registry.insert(Arc::clone(&slow));
        registry.insert(Arc::clone(&fast));

        for n in 0..3 {
            let _ = registry.broadcast_all(&ResponseEnvelope::new("t", json!({"N": n})));
        }
        assert_eq!(slow.drop_count(), 2);
        for n in 0..3 {
            let text = rx_fast.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["Data"]["N"], n);
        }
    }
}

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Buffered messages per push channel before senders back off.
const CHANNEL_CAPACITY: usize = 64;

struct SseSession {
    tx: mpsc::Sender<Value>,
    /// Serializes request handling per session so replies are delivered in
    /// the order requests were received.
    work: Arc<tokio::sync::Mutex<()>>,
    last_response_id: Option<Value>,
}

struct StreamSession {
    notify: Option<mpsc::Sender<Value>>,
    last_response_id: Option<Value>,
}

/// Connected MCP clients on both transports. Safe to touch from any task.
#[derive(Default)]
pub struct SessionRegistry {
    sse: RwLock<HashMap<String, SseSession>>,
    newest_sse: RwLock<Option<String>>,
    streams: RwLock<HashMap<String, StreamSession>>,
}

impl SessionRegistry {
    /// Register a new event-stream session and return its sender.
    pub fn open_sse(&self) -> (String, mpsc::Receiver<Value>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.sse.write().insert(
            id.clone(),
            SseSession {
                tx,
                work: Arc::new(tokio::sync::Mutex::new(())),
                last_response_id: None,
            },
        );
        *self.newest_sse.write() = Some(id.clone());
        (id, rx)
    }

    pub fn close_sse(&self, id: &str) {
        self.sse.write().remove(id);
        let mut newest = self.newest_sse.write();
        if newest.as_deref() == Some(id) {
            // Fall back to any remaining session.
            *newest = self.sse.read().keys().next().cloned();
        }
    }

    /// Resolve the delivery target for a `/messages` submission: the named
    /// session, or the most recently opened one.
    pub fn sse_target(
        &self,
        explicit: Option<&str>,
    ) -> Option<(String, mpsc::Sender<Value>, Arc<tokio::sync::Mutex<()>>)> {
        let id = match explicit {
            Some(id) => id.to_string(),
            None => self.newest_sse.read().clone()?,
        };
        let sessions = self.sse.read();
        let session = sessions.get(&id)?;
        Some((id.clone(), session.tx.clone(), session.work.clone()))
    }

    pub fn record_sse_response_id(&self, id: &str, response_id: Value) {
        if let Some(session) = self.sse.write().get_mut(id) {
            session.last_response_id = Some(response_id);
        }
    }

    /// Mint a new streamable-HTTP session.
    pub fn create_stream(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.streams.write().insert(
            id.clone(),
            StreamSession {
                notify: None,
                last_response_id: None,
            },
        );
        id
    }

    pub fn stream_exists(&self, id: &str) -> bool {
        self.streams.read().contains_key(id)
    }

    /// Attach (or replace) the server-push channel of a stream session.
    /// Returns the receiving end, or `None` for an unknown session.
    pub fn attach_stream_notifier(&self, id: &str) -> Option<mpsc::Receiver<Value>> {
        let mut streams = self.streams.write();
        let session = streams.get_mut(id)?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        session.notify = Some(tx);
        Some(rx)
    }

    pub fn record_stream_response_id(&self, id: &str, response_id: Value) {
        if let Some(session) = self.streams.write().get_mut(id) {
            session.last_response_id = Some(response_id);
        }
    }

    pub fn remove_stream(&self, id: &str) -> bool {
        self.streams.write().remove(id).is_some()
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.sse.read().len(), self.streams.read().len())
    }
}

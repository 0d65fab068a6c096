use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

use crate::{config::CanvasConfig, pipeline::compositor::SketchState};

pub type SessionId = u64;

/// Sketch state of one session. Only that session's loop mutates it; the
/// lock is held for the duration of a single frame or control message.
pub type SharedSketch = Arc<std::sync::Mutex<SketchState>>;

/// Outbound half of a session; drained into the socket by its writer task.
pub type Outbound = mpsc::Sender<Message>;

/// Replies a session may have queued before its loop waits on the socket.
pub const OUTBOUND_CAPACITY: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0} is not registered")]
    UnknownSession(SessionId),
    #[error("session {0} has closed its outbound channel")]
    Closed(SessionId),
}

struct SessionEntry {
    outbound: Outbound,
    sketch: SharedSketch,
}

/// Live sessions keyed by id, each owning its sketch.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
    next_id: Arc<AtomicU64>,
    canvas: CanvasConfig,
}

impl SessionRegistry {
    pub fn new(canvas: CanvasConfig) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            canvas,
        }
    }

    /// Registers a new session with a blank sketch.
    pub async fn register(&self, outbound: Outbound) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sketch = Arc::new(std::sync::Mutex::new(SketchState::new(&self.canvas)));
        self.sessions
            .lock()
            .await
            .insert(id, SessionEntry { outbound, sketch });
        log::debug!("registered session {id}");
        id
    }

    /// Drops the session and its sketch. Returns `false` if it was already
    /// gone.
    pub async fn deregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().await.remove(&id).is_some();
        if removed {
            log::debug!("deregistered session {id}");
        }
        removed
    }

    /// Waits for room in the session's outbound queue, so a client that
    /// stops reading holds up only its own session.
    pub async fn send(&self, id: SessionId, message: Message) -> Result<(), RegistryError> {
        let outbound = self
            .sessions
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.outbound.clone())
            .ok_or(RegistryError::UnknownSession(id))?;
        outbound
            .send(message)
            .await
            .map_err(|_| RegistryError::Closed(id))
    }

    /// Sends to every session without waiting; returns how many accepted the
    /// message. Sessions with a full queue are skipped.
    pub async fn broadcast(&self, message: Message) -> usize {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|(id, entry)| match entry.outbound.try_send(message.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!("session {id} outbound full, skipping broadcast");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            })
            .count()
    }

    pub async fn sketch(&self, id: SessionId) -> Option<SharedSketch> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.sketch.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

//! Client registry
//!
//! Tracks connected listeners. Each listener gets a bounded channel: the registry
//! keeps the writing half ([`ClientSink`]), the transport drains the reading half
//! ([`ClientStream`]) into its connection.
//!
//! The map is shared between connection lifecycle events (attach/detach) and the
//! broadcast path, so every access holds the lock only for a single
//! insert/remove/snapshot and never across an await.

use bytes::Bytes;
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use super::broadcast::BroadcastSink;

/// Unique listener identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Why a listener refused a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRejected {
    /// The reading half is gone
    Closed,
    /// The listener fell too far behind
    Full,
}

/// Writing half of a listener channel
#[derive(Debug, Clone)]
pub struct ClientSink {
    tx: mpsc::Sender<Bytes>,
}

impl ClientSink {
    /// Non-blocking, best-effort write
    pub fn try_write(&self, chunk: Bytes) -> Result<(), WriteRejected> {
        self.tx.try_send(chunk).map_err(|e| match e {
            TrySendError::Closed(_) => WriteRejected::Closed,
            TrySendError::Full(_) => WriteRejected::Full,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reading half of a listener channel
///
/// Yields chunks in broadcast order and ends once the listener is detached.
#[derive(Debug)]
pub struct ClientStream {
    rx: mpsc::Receiver<Bytes>,
}

impl ClientStream {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Chunk already delivered, if any, without waiting
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Refuse further chunks; the next broadcast evicts this listener
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for ClientStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Connected listeners keyed by id
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientSink>>,
    buffer_chunks: usize,
}

impl ClientRegistry {
    /// `buffer_chunks` bounds how far a listener may lag before being dropped
    pub fn new(buffer_chunks: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            buffer_chunks: buffer_chunks.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientSink>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new listener
    pub fn attach(&self) -> (ClientId, ClientStream) {
        let (tx, rx) = mpsc::channel(self.buffer_chunks);
        let mut clients = self.lock();
        let mut id = ClientId::generate();
        while clients.contains_key(&id) {
            id = ClientId::generate();
        }
        clients.insert(id, ClientSink { tx });
        debug!(client_id = %id, total = clients.len(), "Client attached");
        (id, ClientStream { rx })
    }

    /// Remove a listener; unknown ids are ignored
    ///
    /// Returns whether an entry was removed. Dropping the sink ends the
    /// listener's stream.
    pub fn detach(&self, id: ClientId) -> bool {
        let mut clients = self.lock();
        let removed = clients.remove(&id).is_some();
        if removed {
            debug!(client_id = %id, total = clients.len(), "Client detached");
        }
        removed
    }

    /// Remove several listeners under one lock; returns how many were present
    pub fn evict(&self, ids: &[ClientId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut clients = self.lock();
        ids.iter().filter(|id| clients.remove(*id).is_some()).count()
    }

    /// Remove every listener, ending all of their streams
    pub fn disconnect_all(&self) -> usize {
        let mut clients = self.lock();
        let count = clients.len();
        clients.clear();
        count
    }

    /// Copy of the current entries
    pub fn snapshot(&self) -> Vec<(ClientId, ClientSink)> {
        self.lock()
            .iter()
            .map(|(id, sink)| (*id, sink.clone()))
            .collect()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Fan-out sink writing into every registered listener
    pub fn broadcast(self: &Arc<Self>) -> BroadcastSink {
        BroadcastSink::new(Arc::clone(self))
    }
}

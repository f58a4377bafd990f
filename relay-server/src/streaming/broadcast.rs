//! Fan-out sink
//!
//! Writes every chunk to every registered listener. Listeners whose channel is
//! closed or full are evicted after the write pass; the caller never sees
//! their failure, and a slow listener never slows the pipeline down.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, trace};

use super::registry::{ClientId, ClientRegistry, WriteRejected};

/// Outcome of one fan-out write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub evicted: usize,
}

/// Write-once-read-many sink over a [`ClientRegistry`]
#[derive(Clone)]
pub struct BroadcastSink {
    registry: Arc<ClientRegistry>,
}

impl BroadcastSink {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `chunk` to every current listener; never fails
    ///
    /// Works on a snapshot so the registry lock is not held while writing;
    /// listeners attached during the pass only receive later chunks.
    pub fn write(&self, chunk: Bytes) -> Delivery {
        let snapshot = self.registry.snapshot();
        let mut dead: Vec<ClientId> = Vec::new();
        let mut delivered = 0;

        for (id, sink) in snapshot {
            match sink.try_write(chunk.clone()) {
                Ok(()) => delivered += 1,
                Err(WriteRejected::Closed) => {
                    debug!(client_id = %id, "Client disconnected, evicting");
                    dead.push(id);
                }
                Err(WriteRejected::Full) => {
                    debug!(client_id = %id, "Client cannot keep up, evicting");
                    dead.push(id);
                }
            }
        }

        let evicted = self.registry.evict(&dead);
        trace!(bytes = chunk.len(), delivered, evicted, "Broadcast chunk");
        Delivery { delivered, evicted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_only_to_active_clients() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (active, mut active_stream) = registry.attach();
        let (closed, mut closed_stream) = registry.attach();
        closed_stream.close();

        let sink = registry.broadcast();
        let delivery = sink.write(Bytes::from_static(b"Hello World"));

        assert_eq!(delivery, Delivery { delivered: 1, evicted: 1 });
        assert!(registry.contains(active));
        assert!(!registry.contains(closed));
        assert_eq!(
            active_stream.recv().await.unwrap(),
            Bytes::from_static(b"Hello World")
        );
    }

    #[test]
    fn test_n_clients_with_m_closed() {
        let registry = Arc::new(ClientRegistry::new(8));
        let mut streams = Vec::new();
        for i in 0..7 {
            let (_, mut stream) = registry.attach();
            if i % 3 == 0 {
                stream.close();
            }
            streams.push(stream);
        }
        // indices 0, 3, 6 closed
        let delivery = registry.broadcast().write(Bytes::from_static(b"x"));

        assert_eq!(delivery, Delivery { delivered: 4, evicted: 3 });
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_dropped_stream_is_evicted() {
        let registry = Arc::new(ClientRegistry::new(8));
        let (id, stream) = registry.attach();
        drop(stream);

        let delivery = registry.broadcast().write(Bytes::from_static(b"x"));
        assert_eq!(delivery.evicted, 1);
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_slow_client_dropped_without_affecting_others() {
        let registry = Arc::new(ClientRegistry::new(2));
        let (slow, _slow_stream) = registry.attach();
        let (fast, mut fast_stream) = registry.attach();
        let sink = registry.broadcast();

        for n in 0..3u8 {
            sink.write(Bytes::from(vec![n]));
            // Only the fast client drains its channel
            assert_eq!(fast_stream.try_recv().unwrap(), Bytes::from(vec![n]));
        }

        assert!(!registry.contains(slow));
        assert!(registry.contains(fast));
    }

    #[test]
    fn test_no_listeners_is_noop() {
        let registry = Arc::new(ClientRegistry::new(8));
        let delivery = registry.broadcast().write(Bytes::from_static(b"nobody"));
        assert_eq!(delivery, Delivery::default());
    }
}

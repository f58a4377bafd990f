//! Rate-limited passthrough
//!
//! [`Throttle`] pulls from a reader and hands out chunks no faster than a fixed
//! number of bytes per second, which paces file playback to real time. Chunks
//! are a tenth of a second of audio, so listeners get about ten writes per second.
//!
//! [`ThrottleControl::end`] stops further reads; bytes already pulled from the
//! reader are still emitted before the throttle reports completion.

use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound on a single chunk
const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks emitted per second of audio
const CHUNKS_PER_SECOND: u64 = 10;

/// End signal for a running throttle
#[derive(Debug, Clone, Default)]
pub struct ThrottleControl {
    token: CancellationToken,
}

impl ThrottleControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the throttle to flush what it holds and finish
    pub fn end(&self) {
        self.token.cancel();
    }

    pub fn is_ended(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Paces a reader to `bytes_per_second`
pub struct Throttle<R> {
    source: R,
    bytes_per_second: u64,
    chunk_size: usize,
    control: ThrottleControl,
    started: Option<Instant>,
    emitted: u64,
    finished: bool,
}

impl<R: AsyncRead + Unpin> Throttle<R> {
    pub fn new(source: R, bytes_per_second: u64, control: ThrottleControl) -> Self {
        let bytes_per_second = bytes_per_second.max(1);
        let chunk_size = ((bytes_per_second / CHUNKS_PER_SECOND).max(1) as usize).min(MAX_CHUNK_SIZE);
        Self {
            source,
            bytes_per_second,
            chunk_size,
            control,
            started: None,
            emitted: 0,
            finished: false,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total bytes handed out so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Next paced chunk, or `None` once the reader is exhausted or the throttle ended
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }
        if self.control.is_ended() {
            debug!(emitted = self.emitted, "Throttle ended");
            self.finished = true;
            return Ok(None);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            tokio::select! {
                biased;
                _ = self.control.token.cancelled() => break,
                read = self.source.read(&mut buf[filled..]) => {
                    let n = read?;
                    if n == 0 {
                        self.finished = true;
                        break;
                    }
                    filled += n;
                }
            }
        }

        if filled == 0 {
            self.finished = true;
            return Ok(None);
        }

        // Chunk k is released once the previous bytes have had their share of time
        let started = *self.started.get_or_insert_with(Instant::now);
        let offset_nanos = u128::from(self.emitted) * 1_000_000_000 / u128::from(self.bytes_per_second);
        let due = started + Duration::from_nanos(u64::try_from(offset_nanos).unwrap_or(u64::MAX));
        tokio::time::sleep_until(due).await;

        self.emitted += filled as u64;
        buf.truncate(filled);
        Ok(Some(Bytes::from(buf)))
    }
}

//! Throttled pipeline
//!
//! Connects the song source through a [`Throttle`] into the registry's
//! [`BroadcastSink`] and owns the Idle/Streaming lifecycle:
//!
//! ```text
//! Idle --start--> Streaming --(stop | end of song | error)--> Idle
//! ```
//!
//! Start while streaming and stop while idle are both no-ops. Starting claims
//! the Streaming state before the returned future is first polled, so a stop
//! issued right after a start always reaches the run.

use futures::future::{self, BoxFuture, FutureExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncRead;
use tracing::{debug, info};

use super::bitrate::BitrateProber;
use super::broadcast::BroadcastSink;
use super::registry::ClientRegistry;
use super::source::SourceOpener;
use super::throttle::{Throttle, ThrottleControl};
use crate::error::{Error, Result};

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Streaming,
}

/// How a start request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A pipeline was already running; nothing new was started
    AlreadyStreaming,
    /// The pipeline ran to the end of the song or until stopped
    Completed { bytes: u64 },
}

/// Start/stop surface used by the controller
pub trait StreamingPipeline: Send + Sync {
    /// Claim the Streaming state now; the returned future runs the pipeline
    /// to completion
    ///
    /// Dropping the future without driving it returns the pipeline to Idle.
    fn start_streaming(self: Arc<Self>) -> BoxFuture<'static, Result<StreamOutcome>>;

    /// End the active throttle, if any
    fn stop_streaming(&self);

    fn state(&self) -> PipelineState;
}

struct Inner {
    state: PipelineState,
    throttle: Option<ThrottleControl>,
}

/// Source → throttle → broadcast sink
pub struct ThrottledPipeline {
    prober: Arc<dyn BitrateProber>,
    opener: Arc<dyn SourceOpener>,
    registry: Arc<ClientRegistry>,
    song: PathBuf,
    bit_rate_divisor: u64,
    inner: Mutex<Inner>,
    current_byte_rate: AtomicU64,
}

/// Returns the pipeline to Idle however the run ends
struct StreamingGuard {
    pipeline: Arc<ThrottledPipeline>,
}

impl Drop for StreamingGuard {
    fn drop(&mut self) {
        let mut inner = self.pipeline.lock();
        inner.state = PipelineState::Idle;
        inner.throttle = None;
        debug!("Pipeline idle");
    }
}

impl ThrottledPipeline {
    pub fn new(
        prober: Arc<dyn BitrateProber>,
        opener: Arc<dyn SourceOpener>,
        registry: Arc<ClientRegistry>,
        song: PathBuf,
        bit_rate_divisor: u64,
    ) -> Self {
        Self {
            prober,
            opener,
            registry,
            song,
            bit_rate_divisor: bit_rate_divisor.max(1),
            inner: Mutex::new(Inner {
                state: PipelineState::Idle,
                throttle: None,
            }),
            current_byte_rate: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Byte rate of the most recent run (`None` before the first start)
    pub fn current_byte_rate(&self) -> Option<u64> {
        match self.current_byte_rate.load(Ordering::Relaxed) {
            0 => None,
            rate => Some(rate),
        }
    }

    /// Claim the Streaming state; `None` when already streaming
    fn begin(&self) -> Option<ThrottleControl> {
        let mut inner = self.lock();
        if inner.state == PipelineState::Streaming {
            return None;
        }
        let control = ThrottleControl::new();
        inner.state = PipelineState::Streaming;
        inner.throttle = Some(control.clone());
        Some(control)
    }

    /// Probe, open and pump the song; the caller holds the Streaming claim
    async fn run(&self, control: ThrottleControl) -> Result<StreamOutcome> {
        if control.is_ended() {
            info!(song = %self.song.display(), "Stopped before streaming began");
            return Ok(StreamOutcome::Completed { bytes: 0 });
        }

        let bit_rate = self.prober.probe(&self.song).await;
        let byte_rate = bit_rate.byte_rate(self.bit_rate_divisor);
        self.current_byte_rate.store(byte_rate, Ordering::Relaxed);

        let source = self
            .opener
            .open(&self.song)
            .await
            .map_err(|source| Error::Source {
                path: self.song.clone(),
                source,
            })?;

        info!(
            song = %self.song.display(),
            %bit_rate,
            byte_rate,
            listeners = self.registry.len(),
            "Streaming started"
        );

        let throttle = Throttle::new(source, byte_rate, control);
        let bytes = drive(throttle, &self.registry.broadcast()).await?;

        info!(song = %self.song.display(), bytes, "Streaming finished");
        Ok(StreamOutcome::Completed { bytes })
    }
}

/// Pump a throttle into a broadcast sink until the throttle finishes
pub async fn drive<R: AsyncRead + Unpin>(mut throttle: Throttle<R>, sink: &BroadcastSink) -> Result<u64> {
    while let Some(chunk) = throttle.next_chunk().await? {
        sink.write(chunk);
    }
    Ok(throttle.emitted())
}

impl StreamingPipeline for ThrottledPipeline {
    fn start_streaming(self: Arc<Self>) -> BoxFuture<'static, Result<StreamOutcome>> {
        let Some(control) = self.begin() else {
            info!("Already streaming, ignoring start");
            return future::ready(Ok(StreamOutcome::AlreadyStreaming)).boxed();
        };
        let guard = StreamingGuard {
            pipeline: Arc::clone(&self),
        };

        async move {
            let outcome = self.run(control).await;
            drop(guard);
            outcome
        }
        .boxed()
    }

    fn stop_streaming(&self) {
        let inner = self.lock();
        match &inner.throttle {
            Some(control) => {
                info!("Stopping stream");
                control.end();
            }
            None => debug!("Stop requested while idle"),
        }
    }

    fn state(&self) -> PipelineState {
        self.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::bitrate::BitRate;
    use crate::streaming::process::ByteReader;
    use async_trait::async_trait;
    use std::io::{self, Cursor};
    use std::path::Path;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadBuf};

    struct FixedProber {
        bit_rate: BitRate,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BitrateProber for FixedProber {
        async fn probe(&self, _song: &Path) -> BitRate {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bit_rate
        }
    }

    /// Yields its bytes, then fails every later read
    struct BreaksAfter(Cursor<Vec<u8>>);

    impl AsyncRead for BreaksAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let remaining = self.0.get_ref().len() as u64 - self.0.position();
            if remaining == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk gone")));
            }
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    enum FakeSource {
        Bytes(Vec<u8>),
        Pipe(Mutex<Option<DuplexStream>>),
        Breaking(Vec<u8>),
        Missing,
    }

    struct FakeOpener {
        source: FakeSource,
        opened: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl SourceOpener for FakeOpener {
        async fn open(&self, path: &Path) -> io::Result<ByteReader> {
            self.opened.lock().unwrap().push(path.to_path_buf());
            match &self.source {
                FakeSource::Bytes(data) => Ok(Box::new(Cursor::new(data.clone()))),
                FakeSource::Pipe(pipe) => Ok(Box::new(pipe.lock().unwrap().take().unwrap())),
                FakeSource::Breaking(data) => Ok(Box::new(BreaksAfter(Cursor::new(data.clone())))),
                FakeSource::Missing => Err(io::Error::new(io::ErrorKind::NotFound, "no such song")),
            }
        }
    }

    fn pipeline(source: FakeSource) -> (Arc<ThrottledPipeline>, Arc<FixedProber>, Arc<FakeOpener>) {
        let prober = Arc::new(FixedProber {
            bit_rate: BitRate::new(8_000).unwrap(),
            calls: AtomicUsize::new(0),
        });
        let opener = Arc::new(FakeOpener {
            source,
            opened: Mutex::new(Vec::new()),
        });
        let pipeline = Arc::new(ThrottledPipeline::new(
            prober.clone(),
            opener.clone(),
            Arc::new(ClientRegistry::new(1024)),
            PathBuf::from("mySong.mp3"),
            8,
        ));
        (pipeline, prober, opener)
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_song_to_listeners_and_returns_idle() {
        let data: Vec<u8> = (0..2_500u32).map(|i| i as u8).collect();
        let (pipeline, prober, opener) = pipeline(FakeSource::Bytes(data.clone()));
        let (_, mut stream) = pipeline.registry().attach();

        let outcome = Arc::clone(&pipeline).start_streaming().await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { bytes: 2_500 });
        assert_eq!(pipeline.current_byte_rate(), Some(1_000));
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*opener.opened.lock().unwrap(), vec![PathBuf::from("mySong.mp3")]);

        let mut received = Vec::new();
        while let Some(chunk) = stream.try_recv() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_streaming_is_noop_and_stop_drains() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (pipeline, prober, _) = pipeline(FakeSource::Pipe(Mutex::new(Some(reader))));
        let (_, mut stream) = pipeline.registry().attach();

        writer.write_all(&[1u8; 250]).await.unwrap();
        let running = tokio::spawn(Arc::clone(&pipeline).start_streaming());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pipeline.state(), PipelineState::Streaming);

        let second = Arc::clone(&pipeline).start_streaming().await.unwrap();
        assert_eq!(second, StreamOutcome::AlreadyStreaming);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);

        pipeline.stop_streaming();
        let outcome = running.await.unwrap().unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { bytes: 250 });
        assert_eq!(pipeline.state(), PipelineState::Idle);
        let mut received = 0;
        while let Some(chunk) = stream.try_recv() {
            received += chunk.len();
        }
        assert_eq!(received, 250);
        drop(writer);
    }

    #[tokio::test]
    async fn test_start_claims_streaming_before_first_poll() {
        let (pipeline, prober, opener) = pipeline(FakeSource::Bytes(vec![9u8; 10_000]));
        let (_, mut stream) = pipeline.registry().attach();

        let run = Arc::clone(&pipeline).start_streaming();
        assert_eq!(pipeline.state(), PipelineState::Streaming);

        pipeline.stop_streaming();
        let outcome = run.await.unwrap();

        assert_eq!(outcome, StreamOutcome::Completed { bytes: 0 });
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
        assert!(opener.opened.lock().unwrap().is_empty());
        assert!(stream.try_recv().is_none());
    }

    #[test]
    fn test_dropping_unstarted_run_returns_idle() {
        let (pipeline, _, _) = pipeline(FakeSource::Bytes(vec![1u8; 10]));

        let run = Arc::clone(&pipeline).start_streaming();
        assert_eq!(pipeline.state(), PipelineState::Streaming);
        drop(run);

        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (pipeline, _, _) = pipeline(FakeSource::Bytes(Vec::new()));
        pipeline.stop_streaming();
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_open_failure_surfaces_and_returns_idle() {
        let (pipeline, _, _) = pipeline(FakeSource::Missing);

        let err = Arc::clone(&pipeline).start_streaming().await.unwrap_err();

        assert!(matches!(err, Error::Source { .. }));
        assert_eq!(pipeline.state(), PipelineState::Idle);
        // A later start is attempted again, not short-circuited
        assert!(Arc::clone(&pipeline).start_streaming().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_mid_stream_surfaces_and_returns_idle() {
        // 1 000 bytes/s in 100 byte chunks: two full chunks go out, the third
        // read hits the failure after 50 bytes
        let data: Vec<u8> = (0..250u32).map(|i| i as u8).collect();
        let (pipeline, _, _) = pipeline(FakeSource::Breaking(data.clone()));
        let (_, mut stream) = pipeline.registry().attach();

        let err = Arc::clone(&pipeline).start_streaming().await.unwrap_err();

        assert!(matches!(err, Error::Pipeline(_)), "unexpected error: {err}");
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let mut received = Vec::new();
        while let Some(chunk) = stream.try_recv() {
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, data[..200]);
    }
}

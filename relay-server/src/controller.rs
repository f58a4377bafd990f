//! Streaming controller
//!
//! The single long-lived object the HTTP layer talks to. Built once at startup,
//! it owns the client registry and the pipeline and exposes:
//! - `attach_client` / detach-on-close for listener connections
//! - `handle_command` for start/stop
//! - `get_file_stream` for static pages

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::assets::{FileStream, StaticAssets};
use crate::error::Result;
use crate::streaming::{
    BitRate, ClientId, ClientRegistry, ClientStream, FileSourceOpener, PipelineState,
    SoxBitrateProber, StreamOutcome, StreamingPipeline, ThrottledPipeline, TokioProcessRunner,
};
use relay_common::config::TomlConfig;

/// Body of a control request
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Reply to every control request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub result: String,
}

impl CommandResponse {
    pub fn ok() -> Self {
        Self {
            result: "ok".to_string(),
        }
    }
}

/// Normalized control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Unknown(String),
}

impl Command {
    /// Trims and case-folds before matching
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "start" => Command::Start,
            "stop" => Command::Stop,
            _ => Command::Unknown(normalized),
        }
    }
}

/// Detaches a listener when closed or dropped
pub struct DetachGuard {
    id: ClientId,
    registry: Arc<ClientRegistry>,
    detached: bool,
}

impl DetachGuard {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Detach now; the connection is gone
    pub fn close(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            self.registry.detach(self.id);
        }
    }
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.detach();
    }
}

/// A newly attached listener
///
/// Streams the broadcast chunks; dropping it detaches the listener.
pub struct ClientConnection {
    pub id: ClientId,
    pub stream: ClientStream,
    pub on_close: DetachGuard,
}

impl Stream for ClientConnection {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.stream).poll_next(cx)
    }
}

pub struct StreamingController {
    pipeline: Arc<dyn StreamingPipeline>,
    registry: Arc<ClientRegistry>,
    assets: StaticAssets,
    streaming_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamingController {
    pub fn new(
        pipeline: Arc<dyn StreamingPipeline>,
        registry: Arc<ClientRegistry>,
        assets: StaticAssets,
    ) -> Self {
        Self {
            pipeline,
            registry,
            assets,
            streaming_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Wire the production components: sox prober, file source, registry
    pub fn from_config(config: &TomlConfig) -> Result<Self> {
        let streaming = &config.streaming;
        streaming.validate()?;
        let fallback = BitRate::new(streaming.fallback_bit_rate_bps()?).ok_or_else(|| {
            crate::error::Error::Config("fallback_bit_rate must be positive".to_string())
        })?;

        let registry = Arc::new(ClientRegistry::new(streaming.client_buffer_chunks));
        let prober = Arc::new(SoxBitrateProber::new(Arc::new(TokioProcessRunner), fallback));
        let pipeline = Arc::new(ThrottledPipeline::new(
            prober,
            Arc::new(FileSourceOpener),
            Arc::clone(&registry),
            config.song_path(),
            streaming.bit_rate_divisor,
        ));

        info!(
            song = %config.song_path().display(),
            %fallback,
            divisor = streaming.bit_rate_divisor,
            "Streaming controller ready"
        );
        Ok(Self::new(
            pipeline,
            registry,
            StaticAssets::new(config.public_directory.clone()),
        ))
    }

    /// Register a new listener
    pub fn attach_client(&self) -> ClientConnection {
        let (id, stream) = self.registry.attach();
        info!(client_id = %id, listeners = self.registry.len(), "Listener connected");
        ClientConnection {
            id,
            stream,
            on_close: DetachGuard {
                id,
                registry: Arc::clone(&self.registry),
                detached: false,
            },
        }
    }

    /// Dispatch a control command; always answers `ok`
    pub fn handle_command(&self, request: CommandRequest) -> CommandResponse {
        match Command::parse(&request.command) {
            Command::Start => self.spawn_streaming(),
            Command::Stop => self.pipeline.stop_streaming(),
            Command::Unknown(command) => debug!(%command, "Ignoring unknown command"),
        }
        CommandResponse::ok()
    }

    fn spawn_streaming(&self) {
        // Claimed here so a stop arriving before the task runs still ends it
        let run = Arc::clone(&self.pipeline).start_streaming();
        let handle = tokio::spawn(async move {
            match run.await {
                Ok(StreamOutcome::AlreadyStreaming) => debug!("Start ignored, already streaming"),
                Ok(StreamOutcome::Completed { bytes }) => debug!(bytes, "Streaming task done"),
                Err(e) => error!(error = %e, "Streaming failed"),
            }
        });

        let mut tasks = self
            .streaming_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Open a static file by name
    pub async fn get_file_stream(&self, name: &str) -> Result<FileStream> {
        self.assets.file_stream(name).await
    }

    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop streaming, wait for in-flight bytes to reach the listeners, then
    /// hang up on all of them
    pub async fn shutdown(&self) {
        self.pipeline.stop_streaming();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .streaming_tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Streaming task panicked");
            }
        }
        let listeners = self.registry.disconnect_all();
        info!(listeners, "Listeners disconnected");
    }
}

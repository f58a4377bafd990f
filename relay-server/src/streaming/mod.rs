//! Streaming broadcast core
//!
//! ```text
//! song file --> SourceOpener --> Throttle (bitrate / divisor bytes/s) --> BroadcastSink
//!                                    ^                                        |
//!                    BitrateProber --+                      ClientRegistry <--+
//!                   (sox via ProcessRunner)                 (one channel per listener)
//! ```

pub mod bitrate;
pub mod broadcast;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod source;
pub mod throttle;

pub use bitrate::{BitRate, BitrateProber, SoxBitrateProber};
pub use broadcast::{BroadcastSink, Delivery};
pub use pipeline::{PipelineState, StreamOutcome, StreamingPipeline, ThrottledPipeline};
pub use process::{ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use registry::{ClientId, ClientRegistry, ClientStream};
pub use source::{FileSourceOpener, SourceOpener};
pub use throttle::{Throttle, ThrottleControl};

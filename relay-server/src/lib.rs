//! # Live Audio Relay Server (relay-server)
//!
//! Streams a single song to any number of HTTP listeners at its natural
//! playback rate.
//!
//! **Architecture:** one throttled reader feeds a broadcast sink; each listener
//! owns a bounded channel in the client registry and is dropped as soon as a
//! write to it fails.

pub mod api;
pub mod assets;
pub mod controller;
pub mod error;
pub mod streaming;

pub use controller::StreamingController;
pub use error::{Error, Result};

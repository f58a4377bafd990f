//! # Relay Common Library
//!
//! Shared code for the live audio relay:
//! - Error types
//! - Bootstrap configuration loading (TOML + environment + compiled defaults)
//! - Streaming constants (fallback bitrate, bitrate divisor)

pub mod config;
pub mod error;

pub use error::{Error, Result};

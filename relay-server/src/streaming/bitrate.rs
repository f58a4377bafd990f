//! Bitrate detection
//!
//! Runs `sox --i -B <song>` and reads the bitrate it prints (`128k`, `1.41M`, ...).
//! Any stderr output, spawn failure or unparseable stdout yields the configured
//! fallback bitrate instead of an error.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::process::{ProcessOutput, ProcessRunner};

/// Analysis command
pub const SOX_COMMAND: &str = "sox";

/// Encoded audio data rate in bits per second (always positive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitRate(u64);

impl BitRate {
    /// `None` for zero
    pub fn new(bits_per_second: u64) -> Option<Self> {
        (bits_per_second > 0).then_some(Self(bits_per_second))
    }

    pub fn bits_per_second(self) -> u64 {
        self.0
    }

    /// Bytes per second for the throttle, never below 1
    pub fn byte_rate(self, divisor: u64) -> u64 {
        (self.0 / divisor.max(1)).max(1)
    }
}

impl fmt::Display for BitRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected bitrate token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBitRateError(pub String);

impl fmt::Display for ParseBitRateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a bitrate: '{}'", self.0)
    }
}

impl std::error::Error for ParseBitRateError {}

impl FromStr for BitRate {
    type Err = ParseBitRateError;

    /// Accepts plain numbers and sox's `k` (thousands) / `M` (millions) suffixes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let (number, multiplier) = if let Some(n) = token.strip_suffix(['k', 'K']) {
            (n, 1_000.0)
        } else if let Some(n) = token.strip_suffix('M') {
            (n, 1_000_000.0)
        } else {
            (token, 1.0)
        };

        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| ParseBitRateError(token.to_string()))?;
        let bits = (value * multiplier).round();
        if !bits.is_finite() || bits < 1.0 || bits > u64::MAX as f64 {
            return Err(ParseBitRateError(token.to_string()));
        }

        Ok(Self(bits as u64))
    }
}

/// Determines the bitrate of a song
#[async_trait]
pub trait BitrateProber: Send + Sync {
    /// Never fails; returns a fallback when the song cannot be analyzed
    async fn probe(&self, song: &Path) -> BitRate;
}

/// Probes with `sox --i -B`
pub struct SoxBitrateProber {
    runner: Arc<dyn ProcessRunner>,
    fallback: BitRate,
}

impl SoxBitrateProber {
    pub fn new(runner: Arc<dyn ProcessRunner>, fallback: BitRate) -> Self {
        Self { runner, fallback }
    }

    /// Arguments requesting bitrate-only info for `song`
    pub fn probe_args(song: &Path) -> Vec<String> {
        vec![
            "--i".to_string(),
            "-B".to_string(),
            song.to_string_lossy().into_owned(),
        ]
    }

    async fn read_output(output: ProcessOutput) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
        let ProcessOutput {
            mut stdout,
            mut stderr,
            exit,
        } = output;

        let mut out = Vec::new();
        let mut err = Vec::new();
        // Drain both pipes together so a chatty stderr cannot stall stdout
        let (out_res, err_res) = tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
        out_res?;
        err_res?;

        match exit.await {
            Ok(code) => debug!(?code, "sox exited"),
            Err(e) => debug!(error = %e, "Failed to collect sox exit status"),
        }

        Ok((out, err))
    }
}

#[async_trait]
impl BitrateProber for SoxBitrateProber {
    async fn probe(&self, song: &Path) -> BitRate {
        let args = Self::probe_args(song);

        let output = match self.runner.spawn(SOX_COMMAND, &args) {
            Ok(output) => output,
            Err(e) => {
                warn!(song = %song.display(), error = %e, fallback = %self.fallback, "Cannot run sox, using fallback bitrate");
                return self.fallback;
            }
        };

        let (stdout, stderr) = match Self::read_output(output).await {
            Ok(streams) => streams,
            Err(e) => {
                warn!(song = %song.display(), error = %e, fallback = %self.fallback, "Failed reading sox output, using fallback bitrate");
                return self.fallback;
            }
        };

        if !stderr.is_empty() {
            warn!(
                song = %song.display(),
                stderr = %String::from_utf8_lossy(&stderr).trim(),
                fallback = %self.fallback,
                "sox reported an error, using fallback bitrate"
            );
            return self.fallback;
        }

        match String::from_utf8_lossy(&stdout).parse::<BitRate>() {
            Ok(bit_rate) => {
                info!(song = %song.display(), %bit_rate, "Probed bitrate");
                bit_rate
            }
            Err(e) => {
                warn!(song = %song.display(), error = %e, fallback = %self.fallback, "Unparseable sox output, using fallback bitrate");
                self.fallback
            }
        }
    }
}

//! External process runner
//!
//! The bitrate probe shells out to `sox`. Spawning goes through [`ProcessRunner`]
//! so the probe can be exercised with canned output instead of a real process.

use futures::future::BoxFuture;
use std::io;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tracing::debug;

/// Boxed single-pass byte reader
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Handles of a spawned process
///
/// `stdout` and `stderr` are finite and can be read once. `exit` resolves to the
/// exit code (`None` when terminated by a signal).
pub struct ProcessOutput {
    pub stdout: ByteReader,
    pub stderr: ByteReader,
    pub exit: BoxFuture<'static, io::Result<Option<i32>>>,
}

/// Spawns external commands
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<ProcessOutput>;
}

/// Runs commands with `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioProcessRunner;

impl ProcessRunner for TokioProcessRunner {
    fn spawn(&self, program: &str, args: &[String]) -> io::Result<ProcessOutput> {
        debug!(program, ?args, "Spawning process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr not captured"))?;

        Ok(ProcessOutput {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exit: Box::pin(async move { child.wait().await.map(|status| status.code()) }),
        })
    }
}

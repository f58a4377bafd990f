//! Static file resolution for the web pages
//!
//! Names are resolved under the public directory. Anything that would escape it
//! (absolute paths, `..`) is reported as not found.

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tracing::debug;

use crate::error::{Error, Result};

/// Resolved file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Extension including the dot (`.html`), empty when there is none
    pub extension: String,
}

/// Opened file ready to be streamed to a client
#[derive(Debug)]
pub struct FileStream {
    pub stream: File,
    pub content_type: &'static str,
}

/// MIME type for an extension such as `.css`
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        ".html" | ".htm" => "text/html",
        ".css" => "text/css",
        ".js" => "text/javascript",
        ".mp3" => "audio/mpeg",
        ".png" => "image/png",
        ".ico" => "image/x-icon",
        ".svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Error for a resolved asset that could not be opened
fn open_error(name: &str, path: &Path, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(name.to_string()),
        _ => Error::Internal(format!("Cannot open {}: {}", path.display(), err)),
    }
}

/// Files served from the public directory
#[derive(Debug, Clone)]
pub struct StaticAssets {
    public_directory: PathBuf,
}

impl StaticAssets {
    pub fn new(public_directory: impl Into<PathBuf>) -> Self {
        Self {
            public_directory: public_directory.into(),
        }
    }

    /// Locate `name` and report its type
    pub async fn file_info(&self, name: &str) -> Result<FileInfo> {
        let relative = Path::new(name.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative.components().all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::NotFound(name.to_string()));
        }

        let path = self.public_directory.join(relative);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(Error::NotFound(name.to_string())),
        }

        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        Ok(FileInfo { path, extension })
    }

    /// Open `name` for streaming
    pub async fn file_stream(&self, name: &str) -> Result<FileStream> {
        let info = self.file_info(name).await?;
        debug!(path = %info.path.display(), "Serving static file");
        let stream = File::open(&info.path)
            .await
            .map_err(|e| open_error(name, &info.path, e))?;
        Ok(FileStream {
            stream,
            content_type: content_type_for(&info.extension),
        })
    }
}

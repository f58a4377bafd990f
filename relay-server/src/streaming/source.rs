//! Song sources

use async_trait::async_trait;
use std::io;
use std::path::Path;

use super::process::ByteReader;

/// Opens a byte-producing reader over a song
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, path: &Path) -> io::Result<ByteReader>;
}

/// Reads songs from the local filesystem
#[derive(Debug, Default, Clone)]
pub struct FileSourceOpener;

#[async_trait]
impl SourceOpener for FileSourceOpener {
    async fn open(&self, path: &Path) -> io::Result<ByteReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }
}

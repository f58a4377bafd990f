//! Shared fixtures for relay-server integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use relay_server::api::{create_router, AppState};
use relay_server::assets::StaticAssets;
use relay_server::streaming::{BitRate, BitrateProber, ClientRegistry, FileSourceOpener, ThrottledPipeline};
use relay_server::StreamingController;

pub const HOME_HTML: &str = "<html><body>listen</body></html>";
pub const CONTROLLER_HTML: &str = "<html><body>control</body></html>";

/// Always reports the same bitrate
pub struct FixedProber(pub BitRate);

#[async_trait]
impl BitrateProber for FixedProber {
    async fn probe(&self, _song: &Path) -> BitRate {
        self.0
    }
}

/// Public directory and song on disk
pub struct Fixture {
    pub dir: TempDir,
    pub song: PathBuf,
    pub song_bytes: Vec<u8>,
}

impl Fixture {
    pub fn new(song_len: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let public = dir.path().join("public");
        std::fs::create_dir_all(public.join("home")).unwrap();
        std::fs::create_dir_all(public.join("controller")).unwrap();
        std::fs::write(public.join("home/index.html"), HOME_HTML).unwrap();
        std::fs::write(public.join("controller/index.html"), CONTROLLER_HTML).unwrap();
        std::fs::write(public.join("style.css"), "body { margin: 0 }").unwrap();

        let song_bytes: Vec<u8> = (0..song_len).map(|i| (i % 251) as u8).collect();
        let song = dir.path().join("song.mp3");
        std::fs::write(&song, &song_bytes).unwrap();

        Self { dir, song, song_bytes }
    }

    pub fn public_directory(&self) -> PathBuf {
        self.dir.path().join("public")
    }

    /// Controller over the real file source with a fixed bitrate
    pub fn controller(&self, bits_per_second: u64) -> Arc<StreamingController> {
        let registry = Arc::new(ClientRegistry::new(1024));
        let pipeline = Arc::new(ThrottledPipeline::new(
            Arc::new(FixedProber(BitRate::new(bits_per_second).unwrap())),
            Arc::new(FileSourceOpener),
            Arc::clone(&registry),
            self.song.clone(),
            8,
        ));
        Arc::new(StreamingController::new(
            pipeline,
            registry,
            StaticAssets::new(self.public_directory()),
        ))
    }

    pub fn router(&self, controller: &Arc<StreamingController>) -> axum::Router {
        create_router(AppState {
            controller: Arc::clone(controller),
            home_page: "home/index.html".to_string(),
            controller_page: "controller/index.html".to_string(),
        })
    }
}

#![allow(dead_code)]

use std::path::PathBuf;

use vidkit_core::ffmpeg::EnginePaths;
use vidkit_core::sidecar_api::MediaService;
use vidkit_core::test_support::{ClipKind, create_test_video, resolve_engine_for_test};

pub struct IntegrationEnv {
    pub engine: EnginePaths,
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        let engine = resolve_engine_for_test().expect("FFmpeg not found");
        let dir = tempfile::tempdir().expect("tempdir");
        Self { engine, dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn service(&self) -> MediaService {
        MediaService::new(self.engine.clone())
    }

    pub fn with_test_video(&self, input_name: &str, duration_secs: f32, kind: ClipKind) -> PathBuf {
        let output_path = self.path(input_name);
        let status = create_test_video(&self.engine.ffmpeg, &output_path, duration_secs, kind)
            .expect("failed to create test video");
        assert!(status.success(), "ffmpeg failed to create test video");
        output_path
    }
}

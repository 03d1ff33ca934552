use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{DetectError, DetectResult};
use crate::frame::ImageFrame;
use crate::media::{FrameRead, FrameSink, FrameStream, MediaTimeouts, StreamInfo, VideoBackend};

/// A scripted clip: deterministic noise frames, some of which fail to decode.
#[derive(Clone, Debug)]
pub struct SyntheticClip {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub corrupt_frames: BTreeSet<u64>,
    pub seed: u64,
}

impl SyntheticClip {
    pub fn new(frames: u64, width: u32, height: u32) -> Self {
        Self {
            frames,
            width,
            height,
            fps: 25.0,
            corrupt_frames: BTreeSet::new(),
            seed: 0,
        }
    }

    pub fn with_corrupt_frame(mut self, index: u64) -> Self {
        self.corrupt_frames.insert(index);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Pixels of frame `index`. Same seed and index give the same frame.
    pub fn frame(&self, index: u64) -> ImageFrame {
        let mut rng = StdRng::seed_from_u64(self.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut pixels = vec![0u8; self.width as usize * self.height as usize * 3];
        rng.fill_bytes(&mut pixels);
        ImageFrame::from_raw(self.width, self.height, pixels)
            .unwrap_or_else(|| ImageFrame::blank(self.width, self.height))
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            width: self.width,
            height: self.height,
            fps: self.fps,
            frame_count: Some(self.frames),
        }
    }
}

#[derive(Default)]
struct SinkLog {
    written: HashMap<PathBuf, u64>,
    finished: BTreeSet<PathBuf>,
}

/// In-memory video backend: clips are registered per path and sinks only
/// count frames.
#[derive(Clone, Default)]
pub struct SyntheticVideoBackend {
    clips: HashMap<PathBuf, SyntheticClip>,
    failing_sink_after: Option<u64>,
    log: Arc<Mutex<SinkLog>>,
}

impl SyntheticVideoBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip(mut self, path: impl Into<PathBuf>, clip: SyntheticClip) -> Self {
        self.clips.insert(path.into(), clip);
        self
    }

    /// Sinks accept `frames` frames and then fail every write.
    pub fn failing_sink_after(mut self, frames: u64) -> Self {
        self.failing_sink_after = Some(frames);
        self
    }

    pub fn frames_written(&self, path: &Path) -> u64 {
        self.log
            .lock()
            .map(|log| log.written.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_finished(&self, path: &Path) -> bool {
        self.log
            .lock()
            .map(|log| log.finished.contains(path))
            .unwrap_or(false)
    }
}

impl VideoBackend for SyntheticVideoBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, path: &Path, _timeouts: &MediaTimeouts) -> DetectResult<Box<dyn FrameStream>> {
        let clip = self
            .clips
            .get(path)
            .cloned()
            .ok_or_else(|| DetectError::media_open(path, "no synthetic clip registered"))?;
        Ok(Box::new(SyntheticStream { clip, next: 0 }))
    }

    fn create_sink(
        &self,
        path: &Path,
        info: &StreamInfo,
        _timeouts: &MediaTimeouts,
    ) -> DetectResult<Box<dyn FrameSink>> {
        if info.width == 0 || info.height == 0 {
            return Err(DetectError::media_write(path, "zero-sized output"));
        }
        Ok(Box::new(SyntheticSink {
            path: path.to_path_buf(),
            fail_after: self.failing_sink_after,
            written: 0,
            log: Arc::clone(&self.log),
        }))
    }
}

struct SyntheticStream {
    clip: SyntheticClip,
    next: u64,
}

impl FrameStream for SyntheticStream {
    fn info(&self) -> StreamInfo {
        self.clip.info()
    }

    fn read_frame(&mut self) -> DetectResult<FrameRead> {
        if self.next >= self.clip.frames {
            return Ok(FrameRead::End);
        }
        let index = self.next;
        self.next += 1;
        if self.clip.corrupt_frames.contains(&index) {
            return Ok(FrameRead::Corrupt(format!(
                "synthetic corruption at frame {}",
                index
            )));
        }
        Ok(FrameRead::Frame(self.clip.frame(index)))
    }
}

struct SyntheticSink {
    path: PathBuf,
    fail_after: Option<u64>,
    written: u64,
    log: Arc<Mutex<SinkLog>>,
}

impl FrameSink for SyntheticSink {
    fn write_frame(&mut self, _frame: &ImageFrame) -> DetectResult<()> {
        if self.fail_after.is_some_and(|limit| self.written >= limit) {
            return Err(DetectError::media_write(&self.path, "synthetic sink is full"));
        }
        self.written += 1;
        if let Ok(mut log) = self.log.lock() {
            log.written.insert(self.path.clone(), self.written);
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> DetectResult<()> {
        if let Ok(mut log) = self.log.lock() {
            log.finished.insert(self.path.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_deterministic_and_distinct() {
        let clip = SyntheticClip::new(3, 4, 4).with_seed(7);
        assert_eq!(clip.frame(1), clip.frame(1));
        assert_ne!(clip.frame(0).content_hash(), clip.frame(1).content_hash());
    }

    #[test]
    fn stream_reports_corrupt_frames_in_place() {
        let backend = SyntheticVideoBackend::new()
            .with_clip("clip.mp4", SyntheticClip::new(3, 2, 2).with_corrupt_frame(1));
        let mut stream = backend
            .open(Path::new("clip.mp4"), &MediaTimeouts::default())
            .unwrap();
        assert!(matches!(stream.read_frame().unwrap(), FrameRead::Frame(_)));
        assert!(matches!(stream.read_frame().unwrap(), FrameRead::Corrupt(_)));
        assert!(matches!(stream.read_frame().unwrap(), FrameRead::Frame(_)));
        assert!(matches!(stream.read_frame().unwrap(), FrameRead::End));
    }

    #[test]
    fn unknown_path_is_media_open_error() {
        let err = SyntheticVideoBackend::new()
            .open(Path::new("missing.mp4"), &MediaTimeouts::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::MediaOpenError);
    }
}

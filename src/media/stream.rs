use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{DetectError, DetectResult};
use crate::frame::ImageFrame;
use crate::media::MediaTimeouts;

/// Geometry and timing of an opened video.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container-reported frame count, when known. Not trusted for totals.
    pub frame_count: Option<u64>,
}

/// One step of a decoded stream.
#[derive(Debug)]
pub enum FrameRead {
    Frame(ImageFrame),
    /// A frame position exists but its data could not be decoded.
    Corrupt(String),
    End,
}

/// Decoded frames in presentation order. Finite; read until `End`.
pub trait FrameStream {
    fn info(&self) -> StreamInfo;

    /// Next frame. `Err` means the container itself became unreadable.
    fn read_frame(&mut self) -> DetectResult<FrameRead>;
}

/// Encoder for annotated output videos.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &ImageFrame) -> DetectResult<()>;

    /// Flush and close the container.
    fn finish(self: Box<Self>) -> DetectResult<()>;
}

/// Opens video containers for reading and writing.
pub trait VideoBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open(&self, path: &Path, timeouts: &MediaTimeouts) -> DetectResult<Box<dyn FrameStream>>;

    fn create_sink(
        &self,
        path: &Path,
        info: &StreamInfo,
        timeouts: &MediaTimeouts,
    ) -> DetectResult<Box<dyn FrameSink>>;
}

/// Backend used when no decoder is compiled in. Every call fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableVideoBackend;

impl VideoBackend for UnavailableVideoBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn open(&self, path: &Path, _timeouts: &MediaTimeouts) -> DetectResult<Box<dyn FrameStream>> {
        Err(DetectError::media_open(
            path,
            "video decoding requires the video-ffmpeg feature",
        ))
    }

    fn create_sink(
        &self,
        path: &Path,
        _info: &StreamInfo,
        _timeouts: &MediaTimeouts,
    ) -> DetectResult<Box<dyn FrameSink>> {
        Err(DetectError::media_write(
            path,
            "video encoding requires the video-ffmpeg feature",
        ))
    }
}

/// FFmpeg when the `video-ffmpeg` feature is enabled, otherwise a backend
/// that reports every video as unreadable.
pub fn default_video_backend() -> Arc<dyn VideoBackend> {
    #[cfg(feature = "video-ffmpeg")]
    {
        Arc::new(crate::media::FfmpegVideoBackend::new())
    }
    #[cfg(not(feature = "video-ffmpeg"))]
    {
        Arc::new(UnavailableVideoBackend)
    }
}

//! Media classification, image I/O and video backends.
//!
//! Content is classified by magic bytes, never by file extension. Image decode
//! and encode go through the `image` crate; video goes through a `VideoBackend`
//! (FFmpeg when compiled in, synthetic clips in tests).

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use crate::error::{DetectError, DetectResult};
use crate::frame::ImageFrame;

#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;
mod stream;
mod synthetic;

#[cfg(feature = "video-ffmpeg")]
pub use ffmpeg::FfmpegVideoBackend;
pub use stream::{
    default_video_backend, FrameRead, FrameSink, FrameStream, StreamInfo, UnavailableVideoBackend,
    VideoBackend,
};
pub use synthetic::{SyntheticClip, SyntheticVideoBackend};

/// Bytes read from the head of a file for classification.
const SNIFF_LEN: usize = 512;

const MPEG_TS_PACKET: usize = 188;

const IMAGE_BRANDS: [&[u8; 4]; 5] = [b"heic", b"heix", b"mif1", b"msf1", b"avif"];

/// What a file contains, judged from its leading bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Unknown,
}

impl MediaKind {
    pub fn sniff(head: &[u8]) -> MediaKind {
        if head.starts_with(&[0xFF, 0xD8, 0xFF])
            || head.starts_with(b"\x89PNG\r\n\x1a\n")
            || head.starts_with(b"BM")
            || (head.starts_with(b"RIFF") && bytes_at(head, 8, b"WEBP"))
        {
            return MediaKind::Image;
        }

        if bytes_at(head, 4, b"ftyp") {
            if IMAGE_BRANDS.iter().any(|brand| bytes_at(head, 8, &brand[..])) {
                return MediaKind::Image;
            }
            return MediaKind::Video;
        }

        if (head.starts_with(b"RIFF") && bytes_at(head, 8, b"AVI "))
            || head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3])
            || head.starts_with(b"FLV\x01")
            || (head.first() == Some(&0x47) && head.get(MPEG_TS_PACKET) == Some(&0x47))
        {
            return MediaKind::Video;
        }

        MediaKind::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Unknown => "unknown",
        }
    }
}

fn bytes_at(head: &[u8], offset: usize, magic: &[u8]) -> bool {
    head.get(offset..offset + magic.len()) == Some(magic)
}

/// Classify a file by reading its first bytes.
pub fn sniff_file(path: &Path) -> DetectResult<MediaKind> {
    let mut file = File::open(path).map_err(|e| DetectError::media_open(path, e.to_string()))?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref()
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| DetectError::media_open(path, e.to_string()))?;
    Ok(MediaKind::sniff(&head))
}

/// Decode an image file into an RGB8 frame. The format is detected from content.
pub fn load_image(path: &Path) -> DetectResult<ImageFrame> {
    let bytes = std::fs::read(path).map_err(|e| DetectError::media_open(path, e.to_string()))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| DetectError::media_open(path, format!("decode image: {}", e)))?;
    Ok(ImageFrame::from_dynamic(image))
}

/// Encode a frame; the format follows the output extension.
pub fn save_image(frame: &ImageFrame, path: &Path) -> DetectResult<()> {
    frame
        .as_rgb_image()
        .save(path)
        .map_err(|e| DetectError::media_write(path, e.to_string()))
}

/// Deadlines applied to media I/O.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MediaTimeouts {
    pub open: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl MediaTimeouts {
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            open: timeout,
            read: timeout,
            write: timeout,
        }
    }
}

impl Default for MediaTimeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(30))
    }
}

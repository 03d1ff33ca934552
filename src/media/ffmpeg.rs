//! FFmpeg-backed video decode and encode.
//!
//! Decoding runs packet by packet so only one decoded frame is alive at a time.
//! Open and read deadlines are enforced through the demuxer interrupt callback;
//! encoding writes MPEG-4 Part 2 into whatever container the output extension
//! names.

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{self, flag::Flags};
use ffmpeg::{Packet, Rational};

use crate::error::{DetectError, DetectResult};
use crate::frame::ImageFrame;
use crate::media::{FrameRead, FrameSink, FrameStream, MediaTimeouts, StreamInfo, VideoBackend};

const FALLBACK_FPS: f64 = 25.0;

#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegVideoBackend;

impl FfmpegVideoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl VideoBackend for FfmpegVideoBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn open(&self, path: &Path, timeouts: &MediaTimeouts) -> DetectResult<Box<dyn FrameStream>> {
        Ok(Box::new(FfmpegStream::open(path, timeouts)?))
    }

    fn create_sink(
        &self,
        path: &Path,
        info: &StreamInfo,
        timeouts: &MediaTimeouts,
    ) -> DetectResult<Box<dyn FrameSink>> {
        Ok(Box::new(FfmpegSink::create(path, info, timeouts)?))
    }
}

/// Shared deadline read by the interrupt callback.
#[derive(Clone)]
struct Deadline(Arc<Mutex<Instant>>);

impl Deadline {
    fn new(after: Duration) -> Self {
        Self(Arc::new(Mutex::new(Instant::now() + after)))
    }

    fn arm(&self, after: Duration) {
        if let Ok(mut at) = self.0.lock() {
            *at = Instant::now() + after;
        }
    }

    fn expired(&self) -> bool {
        self.0.lock().map(|at| Instant::now() > *at).unwrap_or(false)
    }
}

struct FfmpegStream {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: scaling::Context,
    info: StreamInfo,
    deadline: Deadline,
    read_timeout: Duration,
    eof_sent: bool,
}

impl FfmpegStream {
    fn open(path: &Path, timeouts: &MediaTimeouts) -> DetectResult<Self> {
        let open_err = |msg: String| DetectError::media_open(path, msg);
        ffmpeg::init().map_err(|e| open_err(format!("initialize ffmpeg: {}", e)))?;

        let deadline = Deadline::new(timeouts.open);
        let watcher = deadline.clone();
        let input = ffmpeg::format::input_with_interrupt(&path, move || watcher.expired())
            .map_err(|e| {
                if deadline.expired() {
                    open_err(format!("open timed out after {:?}", timeouts.open))
                } else {
                    open_err(e.to_string())
                }
            })?;

        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| open_err("file has no video track".to_string()))?;
        let stream_index = input_stream.index();
        let fps = match f64::from(input_stream.avg_frame_rate()) {
            fps if fps.is_finite() && fps > 0.0 => fps,
            _ => FALLBACK_FPS,
        };
        let frame_count = u64::try_from(input_stream.frames()).ok().filter(|n| *n > 0);

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| open_err(format!("load video decoder parameters: {}", e)))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| open_err(format!("open video decoder: {}", e)))?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(open_err("video track has zero-sized frames".to_string()));
        }

        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            Flags::BILINEAR,
        )
        .map_err(|e| open_err(format!("create scaler: {}", e)))?;

        let info = StreamInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            frame_count,
        };
        log::info!(
            "opened {} ({}x{} @ {:.2} fps)",
            path.display(),
            info.width,
            info.height,
            info.fps
        );

        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            info,
            deadline,
            read_timeout: timeouts.read,
            eof_sent: false,
        })
    }

    /// Pull one decoded frame out of the decoder, if it has one ready.
    fn receive_decoded(&mut self) -> Option<FrameRead> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return None;
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        if let Err(e) = self.scaler.run(&decoded, &mut rgb_frame) {
            return Some(FrameRead::Corrupt(format!("scale frame to RGB: {}", e)));
        }
        Some(match frame_to_pixels(&rgb_frame) {
            Ok(frame) => FrameRead::Frame(frame),
            Err(message) => FrameRead::Corrupt(message),
        })
    }
}

impl FrameStream for FfmpegStream {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn read_frame(&mut self) -> DetectResult<FrameRead> {
        loop {
            if let Some(read) = self.receive_decoded() {
                return Ok(read);
            }
            if self.eof_sent {
                return Ok(FrameRead::End);
            }

            self.deadline.arm(self.read_timeout);
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        return Ok(FrameRead::Corrupt(format!("decode packet: {}", e)));
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    // Drain frames still buffered in the decoder.
                    let _ = self.decoder.send_eof();
                    self.eof_sent = true;
                }
                Err(e) => {
                    let message = if self.deadline.expired() {
                        format!("read timed out after {:?}", self.read_timeout)
                    } else {
                        format!("read packet: {}", e)
                    };
                    return Err(DetectError::media_open(&self.path, message));
                }
            }
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<ImageFrame, String> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    let pixels = if stride == row_bytes {
        data.get(..row_bytes * height as usize)
            .ok_or_else(|| "frame buffer is shorter than its dimensions".to_string())?
            .to_vec()
    } else {
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_bytes;
            pixels.extend_from_slice(
                data.get(start..end)
                    .ok_or_else(|| "frame row is out of bounds".to_string())?,
            );
        }
        pixels
    };

    ImageFrame::from_raw(width, height, pixels)
        .ok_or_else(|| "frame buffer does not match its dimensions".to_string())
}

struct FfmpegSink {
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: scaling::Context,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    next_pts: i64,
    write_timeout: Duration,
}

impl FfmpegSink {
    fn create(path: &Path, info: &StreamInfo, timeouts: &MediaTimeouts) -> DetectResult<Self> {
        let write_err = |msg: String| DetectError::media_write(path, msg);
        ffmpeg::init().map_err(|e| write_err(format!("initialize ffmpeg: {}", e)))?;

        let started = Instant::now();
        let mut output =
            ffmpeg::format::output(&path).map_err(|e| write_err(format!("create output: {}", e)))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| write_err("MPEG-4 encoder not available".to_string()))?;
        let fps = info.fps.round().clamp(1.0, 240.0) as i32;
        let encoder_time_base = Rational::new(1, fps);

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| write_err(format!("create encoder: {}", e)))?;
        encoder.set_width(info.width);
        encoder.set_height(info.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(encoder_time_base);
        encoder.set_frame_rate(Some(Rational::new(fps, 1)));
        if global_header {
            encoder.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = encoder
            .open_as(codec)
            .map_err(|e| write_err(format!("open encoder: {}", e)))?;

        let stream_index = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|e| write_err(format!("add output stream: {}", e)))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            stream.index()
        };

        output
            .write_header()
            .map_err(|e| write_err(format!("write header: {}", e)))?;
        let stream_time_base = output
            .stream(stream_index)
            .map(|s| s.time_base())
            .unwrap_or(encoder_time_base);

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            info.width,
            info.height,
            Pixel::YUV420P,
            info.width,
            info.height,
            Flags::BILINEAR,
        )
        .map_err(|e| write_err(format!("create scaler: {}", e)))?;

        if started.elapsed() > timeouts.write {
            return Err(write_err(format!(
                "opening output exceeded {:?}",
                timeouts.write
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            width: info.width,
            height: info.height,
            next_pts: 0,
            write_timeout: timeouts.write,
        })
    }

    fn drain_packets(&mut self) -> DetectResult<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| DetectError::media_write(&self.path, format!("write packet: {}", e)))?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegSink {
    fn write_frame(&mut self, frame: &ImageFrame) -> DetectResult<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(DetectError::media_write(
                &self.path,
                format!(
                    "frame is {}x{}, output is {}x{}",
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                ),
            ));
        }
        let started = Instant::now();

        let mut rgb_frame = ffmpeg::frame::Video::new(Pixel::RGB24, self.width, self.height);
        let row_bytes = self.width as usize * 3;
        let stride = rgb_frame.stride(0);
        let plane = rgb_frame.data_mut(0);
        for (row, src) in frame.pixels().chunks_exact(row_bytes).enumerate() {
            let start = row * stride;
            plane[start..start + row_bytes].copy_from_slice(src);
        }

        let mut yuv_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb_frame, &mut yuv_frame)
            .map_err(|e| DetectError::media_write(&self.path, format!("convert frame: {}", e)))?;
        yuv_frame.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder
            .send_frame(&yuv_frame)
            .map_err(|e| DetectError::media_write(&self.path, format!("encode frame: {}", e)))?;
        self.drain_packets()?;

        if started.elapsed() > self.write_timeout {
            return Err(DetectError::media_write(
                &self.path,
                format!("frame write exceeded {:?}", self.write_timeout),
            ));
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> DetectResult<()> {
        self.encoder
            .send_eof()
            .map_err(|e| DetectError::media_write(&self.path, format!("flush encoder: {}", e)))?;
        self.drain_packets()?;
        self.output
            .write_trailer()
            .map_err(|e| DetectError::media_write(&self.path, format!("write trailer: {}", e)))
    }
}

//! Per-frame detection over decoded video.
//!
//! `FrameResults` is the lazy, restartable sequence of per-frame outcomes;
//! `VideoProcessor::process` drains it, optionally re-encodes annotated frames,
//! and folds everything into a `VideoSummary`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::detect::{ConfidenceThreshold, FrameDetector, FrameResult};
use crate::error::{DetectError, DetectResult, ErrorKind};
use crate::frame::{annotate, ImageFrame};
use crate::media::{FrameRead, FrameStream, MediaTimeouts, StreamInfo, VideoBackend};

/// Aggregate statistics for one processed video.
///
/// Only built from frame results (`VideoTally` or `from_frames`), so the
/// totals always agree with the frames they came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    source_identifier: String,
    total_frames: u64,
    total_detections: u64,
    avg_detections_per_frame: f64,
    failed_frames: u64,
    /// False when processing was cancelled before the last frame.
    complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_path: Option<PathBuf>,
}

impl VideoSummary {
    pub fn from_frames(source_identifier: impl Into<String>, frames: &[FrameResult]) -> Self {
        let mut tally = VideoTally::new(source_identifier);
        for frame in frames {
            tally.record(frame);
        }
        tally.summary(true, None)
    }

    pub fn source_identifier(&self) -> &str {
        &self.source_identifier
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn total_detections(&self) -> u64 {
        self.total_detections
    }

    pub fn avg_detections_per_frame(&self) -> f64 {
        self.avg_detections_per_frame
    }

    pub fn failed_frames(&self) -> u64 {
        self.failed_frames
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }
}

/// Running totals while frames stream past.
#[derive(Clone, Debug)]
pub struct VideoTally {
    source_identifier: String,
    total_frames: u64,
    total_detections: u64,
    failed_frames: u64,
}

impl VideoTally {
    pub fn new(source_identifier: impl Into<String>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            total_frames: 0,
            total_detections: 0,
            failed_frames: 0,
        }
    }

    pub fn record(&mut self, frame: &FrameResult) {
        self.total_frames += 1;
        self.total_detections += frame.detections().len() as u64;
        if frame.is_failed() {
            self.failed_frames += 1;
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn summary(&self, complete: bool, output_path: Option<PathBuf>) -> VideoSummary {
        VideoSummary {
            source_identifier: self.source_identifier.clone(),
            total_frames: self.total_frames,
            total_detections: self.total_detections,
            avg_detections_per_frame: self.total_detections as f64
                / self.total_frames.max(1) as f64,
            failed_frames: self.failed_frames,
            complete,
            output_path,
        }
    }
}

/// Runs the frame detector over every frame of a video.
#[derive(Clone)]
pub struct VideoProcessor {
    detector: FrameDetector,
    backend: Arc<dyn VideoBackend>,
    timeouts: MediaTimeouts,
}

impl VideoProcessor {
    pub fn new(detector: FrameDetector, backend: Arc<dyn VideoBackend>) -> Self {
        Self {
            detector,
            backend,
            timeouts: MediaTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: MediaTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn detector(&self) -> &FrameDetector {
        &self.detector
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Open `path` and return its frame results as a lazy sequence.
    pub fn frames(&self, path: &Path, threshold: ConfidenceThreshold) -> DetectResult<FrameResults> {
        let stream = self.backend.open(path, &self.timeouts)?;
        Ok(FrameResults {
            detector: self.detector.clone(),
            backend: Arc::clone(&self.backend),
            timeouts: self.timeouts,
            path: path.to_path_buf(),
            source_identifier: path.display().to_string(),
            threshold,
            stream,
            next_index: 0,
            done: false,
        })
    }

    pub fn process(
        &self,
        path: &Path,
        threshold: ConfidenceThreshold,
        output: Option<&Path>,
    ) -> DetectResult<VideoSummary> {
        self.process_with(path, threshold, output, &CancelToken::new(), &mut |_| {})
    }

    /// Process every frame, writing annotated frames to `output` when given.
    ///
    /// Per-frame failures are recorded and skipped over. A container that
    /// cannot be read, or has no frames, is `MediaOpen`; any failed output
    /// write is `MediaWrite` for the whole video. Cancellation stops at the
    /// next frame boundary and returns a summary with `complete == false`.
    pub fn process_with(
        &self,
        path: &Path,
        threshold: ConfidenceThreshold,
        output: Option<&Path>,
        cancel: &CancelToken,
        observer: &mut dyn FnMut(&FrameResult),
    ) -> DetectResult<VideoSummary> {
        let mut frames = self.frames(path, threshold)?;
        let info = frames.info();
        let mut sink = match output {
            Some(out) => Some(self.backend.create_sink(out, &info, &self.timeouts)?),
            None => None,
        };

        let mut tally = VideoTally::new(path.display().to_string());
        let mut complete = true;
        loop {
            if cancel.is_cancelled() {
                log::warn!(
                    "{}: cancelled after {} frames",
                    path.display(),
                    tally.total_frames()
                );
                complete = false;
                break;
            }
            let Some(step) = frames.advance() else {
                break;
            };
            let (frame_result, pixels) = step?;

            if let Some(sink) = sink.as_mut() {
                let annotated = match &pixels {
                    Some(frame) => annotate(frame, frame_result.detections()),
                    None => ImageFrame::blank(info.width, info.height),
                };
                sink.write_frame(&annotated)?;
            }
            tally.record(&frame_result);
            observer(&frame_result);
        }

        if complete && tally.total_frames() == 0 {
            return Err(DetectError::media_open(path, "video contains zero frames"));
        }
        if let Some(sink) = sink {
            sink.finish()?;
        }

        let summary = tally.summary(complete, output.map(Path::to_path_buf));
        log::info!(
            "{}: {} frames, {} detections, {} failed",
            path.display(),
            summary.total_frames(),
            summary.total_detections(),
            summary.failed_frames()
        );
        Ok(summary)
    }
}

/// Lazy, finite sequence of per-frame results in temporal order.
///
/// Holds at most one decoded frame at a time. `restart` reopens the video and
/// begins again at frame 0.
pub struct FrameResults {
    detector: FrameDetector,
    backend: Arc<dyn VideoBackend>,
    timeouts: MediaTimeouts,
    path: PathBuf,
    source_identifier: String,
    threshold: ConfidenceThreshold,
    stream: Box<dyn FrameStream>,
    next_index: u64,
    done: bool,
}

impl FrameResults {
    pub fn info(&self) -> StreamInfo {
        self.stream.info()
    }

    pub fn restart(&mut self) -> DetectResult<()> {
        self.stream = self.backend.open(&self.path, &self.timeouts)?;
        self.next_index = 0;
        self.done = false;
        Ok(())
    }

    /// Next frame result plus the decoded pixels, if the frame decoded.
    fn advance(&mut self) -> Option<DetectResult<(FrameResult, Option<ImageFrame>)>> {
        if self.done {
            return None;
        }
        let read = match self.stream.read_frame() {
            Ok(read) => read,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let index = self.next_index;
        let step = match read {
            FrameRead::End => {
                self.done = true;
                return None;
            }
            FrameRead::Frame(frame) => {
                let result = match self
                    .detector
                    .detect(&self.source_identifier, &frame, self.threshold)
                {
                    Ok(result) => FrameResult::detected(index, result),
                    Err(e) => {
                        log::warn!("{} frame {}: {}", self.source_identifier, index, e);
                        FrameResult::failed(
                            index,
                            &self.source_identifier,
                            self.threshold,
                            e.kind(),
                            e.to_string(),
                        )
                    }
                };
                (result, Some(frame))
            }
            FrameRead::Corrupt(message) => {
                log::warn!(
                    "{} frame {}: undecodable ({})",
                    self.source_identifier,
                    index,
                    message
                );
                let result = FrameResult::failed(
                    index,
                    &self.source_identifier,
                    self.threshold,
                    ErrorKind::MediaOpenError,
                    message,
                );
                (result, None)
            }
        };
        self.next_index += 1;
        Some(Ok(step))
    }
}

impl Iterator for FrameResults {
    type Item = DetectResult<FrameResult>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().map(|step| step.map(|(result, _)| result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, DetectionResult};

    fn frame_with(index: u64, count: usize) -> FrameResult {
        let detections = (0..count)
            .map(|_| Detection::new(BoundingBox::new(0.1, 0.1, 0.2, 0.2), 0.9, "Human"))
            .collect();
        FrameResult::detected(
            index,
            DetectionResult::new("v.mp4", ConfidenceThreshold::DEFAULT, 4, 4, detections),
        )
    }

    #[test]
    fn average_is_detections_over_frames() {
        let frames = vec![frame_with(0, 3), frame_with(1, 0), frame_with(2, 1), frame_with(3, 2)];
        let summary = VideoSummary::from_frames("v.mp4", &frames);
        assert_eq!(summary.total_frames(), 4);
        assert_eq!(summary.total_detections(), 6);
        assert!((summary.avg_detections_per_frame() - 1.5).abs() < 1e-12);
        assert!(summary.is_complete());
    }

    #[test]
    fn average_of_no_frames_is_zero() {
        let summary = VideoSummary::from_frames("v.mp4", &[]);
        assert_eq!(summary.total_frames(), 0);
        assert_eq!(summary.avg_detections_per_frame(), 0.0);
    }

    #[test]
    fn failed_frames_count_toward_totals() {
        let failed = FrameResult::failed(
            1,
            "v.mp4",
            ConfidenceThreshold::DEFAULT,
            ErrorKind::InferenceError,
            "boom",
        );
        let summary = VideoSummary::from_frames("v.mp4", &[frame_with(0, 2), failed]);
        assert_eq!(summary.total_frames(), 2);
        assert_eq!(summary.failed_frames(), 1);
        assert!((summary.avg_detections_per_frame() - 1.0).abs() < 1e-12);
    }
}

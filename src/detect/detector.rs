use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::detect::{DetectionResult, DetectorBackend};
use crate::error::{DetectError, DetectResult};
use crate::frame::ImageFrame;

/// Minimum confidence a detection needs to be kept. Always in `(0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
    pub const DEFAULT: ConfidenceThreshold = ConfidenceThreshold(0.5);

    pub fn new(value: f32) -> DetectResult<Self> {
        if value.is_finite() && value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(DetectError::InvalidConfig(format!(
                "confidence threshold must be in (0, 1], got {}",
                value
            )))
        }
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f32> for ConfidenceThreshold {
    type Error = DetectError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConfidenceThreshold> for f32 {
    fn from(threshold: ConfidenceThreshold) -> Self {
        threshold.0
    }
}

impl fmt::Display for ConfidenceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Applies a detection backend to single images and enforces the output contract.
///
/// Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct FrameDetector {
    backend: Arc<dyn DetectorBackend>,
}

impl FrameDetector {
    pub fn new(backend: Arc<dyn DetectorBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run the backend once and keep detections with `confidence >= threshold`.
    ///
    /// Backend order is preserved. Any backend error or malformed detection
    /// fails the whole image with `DetectError::Inference`.
    pub fn detect(
        &self,
        source_identifier: &str,
        frame: &ImageFrame,
        threshold: ConfidenceThreshold,
    ) -> DetectResult<DetectionResult> {
        let raw = self.backend.infer(frame).map_err(|e| {
            DetectError::inference(
                source_identifier,
                format!("{} backend: {:#}", self.backend.name(), e),
            )
        })?;

        for (idx, detection) in raw.iter().enumerate() {
            let confidence = detection.confidence();
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(DetectError::inference(
                    source_identifier,
                    format!("detection #{} has invalid confidence {}", idx, confidence),
                ));
            }
            if !detection.bbox().is_normalized() {
                return Err(DetectError::inference(
                    source_identifier,
                    format!(
                        "detection #{} has a box outside [0,1]: {:?}",
                        idx,
                        detection.bbox()
                    ),
                ));
            }
        }

        let kept: Vec<_> = raw
            .into_iter()
            .filter(|d| d.confidence() >= threshold.value())
            .collect();

        Ok(DetectionResult::new(
            source_identifier,
            threshold,
            frame.width(),
            frame.height(),
            kept,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};

    fn det(confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(0.1, 0.1, 0.4, 0.6), confidence, "Human")
    }

    #[test]
    fn threshold_range_is_enforced() {
        assert!(ConfidenceThreshold::new(0.0).is_err());
        assert!(ConfidenceThreshold::new(1.2).is_err());
        assert!(ConfidenceThreshold::new(f32::NAN).is_err());
        assert_eq!(ConfidenceThreshold::new(1.0).unwrap().value(), 1.0);
        assert!(serde_json::from_str::<ConfidenceThreshold>("0.0").is_err());
        assert_eq!(
            serde_json::from_str::<ConfidenceThreshold>("0.25").unwrap().value(),
            0.25
        );
    }

    #[test]
    fn filters_below_threshold_and_preserves_order() {
        let backend = StubBackend::new().with_default(vec![det(0.9), det(0.2), det(0.5), det(0.7)]);
        let detector = FrameDetector::new(Arc::new(backend));
        let frame = ImageFrame::blank(8, 8);

        let result = detector
            .detect("a.jpg", &frame, ConfidenceThreshold::new(0.5).unwrap())
            .unwrap();
        let confidences: Vec<f32> = result.detections().iter().map(|d| d.confidence()).collect();
        assert_eq!(confidences, vec![0.9, 0.5, 0.7]);
        assert_eq!(result.source_identifier(), "a.jpg");
        assert_eq!(result.image_size(), (8, 8));
    }

    #[test]
    fn every_kept_detection_meets_threshold() {
        let confidences = [0.05, 0.15, 0.3, 0.45, 0.5, 0.55, 0.8, 0.95, 1.0];
        let backend =
            StubBackend::new().with_default(confidences.iter().map(|&c| det(c)).collect());
        let detector = FrameDetector::new(Arc::new(backend));
        let frame = ImageFrame::blank(4, 4);

        for t in [0.01, 0.1, 0.3, 0.5, 0.75, 1.0] {
            let threshold = ConfidenceThreshold::new(t).unwrap();
            let result = detector.detect("img", &frame, threshold).unwrap();
            assert!(result.detections().iter().all(|d| d.confidence() >= t));
            let expected = confidences.iter().filter(|&&c| c >= t).count();
            assert_eq!(result.len(), expected);
        }
    }

    #[test]
    fn malformed_output_is_an_inference_error() {
        let frame = ImageFrame::blank(4, 4);
        let threshold = ConfidenceThreshold::DEFAULT;

        let nan = StubBackend::new().with_default(vec![det(f32::NAN)]);
        let err = FrameDetector::new(Arc::new(nan))
            .detect("nan.jpg", &frame, threshold)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InferenceError);

        let outside = StubBackend::new().with_default(vec![Detection::new(
            BoundingBox::new(0.2, 0.2, 1.4, 0.9),
            0.9,
            "Human",
        )]);
        let err = FrameDetector::new(Arc::new(outside))
            .detect("outside.jpg", &frame, threshold)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InferenceError);
    }

    #[test]
    fn backend_failure_is_an_inference_error() {
        let frame = ImageFrame::blank(4, 4);
        let backend = StubBackend::new().fail_on(&frame, "weights not loaded");
        let err = FrameDetector::new(Arc::new(backend))
            .detect("x.png", &frame, ConfidenceThreshold::DEFAULT)
            .unwrap_err();
        assert!(err.to_string().contains("weights not loaded"));
        assert!(err.to_string().contains("x.png"));
    }
}

use serde::{Deserialize, Serialize};

use crate::detect::ConfidenceThreshold;
use crate::error::ErrorKind;

/// Axis-aligned box in normalized `[0, 1]` image coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Build from a center point and size, as YOLO labels and model outputs express boxes.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    /// Clamp every coordinate into `[0, 1]`.
    pub fn clamped(self) -> Self {
        Self::new(
            self.x_min.clamp(0.0, 1.0),
            self.y_min.clamp(0.0, 1.0),
            self.x_max.clamp(0.0, 1.0),
            self.y_max.clamp(0.0, 1.0),
        )
    }

    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let w = (self.x_max.min(other.x_max) - self.x_min.max(other.x_min)).max(0.0);
        let h = (self.y_max.min(other.y_max) - self.y_min.max(other.y_min)).max(0.0);
        w * h
    }

    /// Intersection over union; 0 when both boxes are degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// True when all coordinates are finite, inside `[0, 1]`, and min <= max.
    pub fn is_normalized(&self) -> bool {
        let coords = [self.x_min, self.y_min, self.x_max, self.y_max];
        coords
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
            && self.x_min <= self.x_max
            && self.y_min <= self.y_max
    }
}

/// One detected object. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    bbox: BoundingBox,
    confidence: f32,
    class_label: String,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32, class_label: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_label: class_label.into(),
        }
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn class_label(&self) -> &str {
        &self.class_label
    }
}

/// Detections for one image, already filtered by the threshold recorded here.
///
/// Only `FrameDetector` builds these, which keeps the invariant
/// `detection.confidence >= confidence_threshold` for every entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    source_identifier: String,
    confidence_threshold: f32,
    image_width: u32,
    image_height: u32,
    detections: Vec<Detection>,
}

impl DetectionResult {
    pub(crate) fn new(
        source_identifier: impl Into<String>,
        threshold: ConfidenceThreshold,
        image_width: u32,
        image_height: u32,
        detections: Vec<Detection>,
    ) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            confidence_threshold: threshold.value(),
            image_width,
            image_height,
            detections,
        }
    }

    pub(crate) fn empty(source_identifier: impl Into<String>, threshold: ConfidenceThreshold) -> Self {
        Self::new(source_identifier, threshold, 0, 0, Vec::new())
    }

    pub fn source_identifier(&self) -> &str {
        &self.source_identifier
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.image_width, self.image_height)
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

/// Why a video frame produced no detections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameFailure {
    pub error_kind: ErrorKind,
    pub message: String,
}

/// Detection result for one frame of a video.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u64,
    #[serde(flatten)]
    result: DetectionResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FrameFailure>,
}

impl FrameResult {
    pub(crate) fn detected(frame_index: u64, result: DetectionResult) -> Self {
        Self {
            frame_index,
            result,
            failure: None,
        }
    }

    pub(crate) fn failed(
        frame_index: u64,
        source_identifier: &str,
        threshold: ConfidenceThreshold,
        error_kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            frame_index,
            result: DetectionResult::empty(source_identifier, threshold),
            failure: Some(FrameFailure {
                error_kind,
                message: message.into(),
            }),
        }
    }

    pub fn result(&self) -> &DetectionResult {
        &self.result
    }

    pub fn detections(&self) -> &[Detection] {
        self.result.detections()
    }

    pub fn failure(&self) -> Option<&FrameFailure> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(0.1, 0.1, 0.5, 0.5);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 0.5, 0.5);
        let b = BoundingBox::new(0.25, 0.0, 0.75, 0.5);
        // intersection 0.125, union 0.375
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_and_degenerate_boxes_have_zero_iou() {
        let a = BoundingBox::new(0.0, 0.0, 0.2, 0.2);
        let b = BoundingBox::new(0.5, 0.5, 0.9, 0.9);
        assert_eq!(a.iou(&b), 0.0);
        let point = BoundingBox::new(0.3, 0.3, 0.3, 0.3);
        assert_eq!(point.iou(&point), 0.0);
    }

    #[test]
    fn normalization_check_rejects_out_of_range_and_inverted() {
        assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_normalized());
        assert!(!BoundingBox::new(-0.1, 0.0, 0.5, 0.5).is_normalized());
        assert!(!BoundingBox::new(0.6, 0.0, 0.5, 0.5).is_normalized());
        assert!(!BoundingBox::new(0.0, f32::NAN, 0.5, 0.5).is_normalized());
    }

    #[test]
    fn detection_serializes_box_field_name() {
        let det = Detection::new(BoundingBox::new(0.1, 0.2, 0.3, 0.4), 0.8, "Human");
        let json = serde_json::to_value(&det).unwrap();
        assert!(json.get("box").is_some());
        assert_eq!(json["class_label"], "Human");
    }
}

#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::{BoundingBox, Detection};
use crate::frame::ImageFrame;

/// Square input side used by exported YOLOv8 models.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Candidates below this score never reach NMS.
const CANDIDATE_FLOOR: f32 = 0.01;

const NMS_IOU: f32 = 0.45;

const CXYWH_OFFSET: usize = 4;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Loads a local model file once; inference is read-only so one instance is
/// shared across workers. No network I/O.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
        })
    }

    fn build_input(&self, frame: &ImageFrame) -> Tensor {
        let resized = imageops::resize(
            frame.as_rgb_image(),
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn class_label(&self, id: usize) -> String {
        self.class_names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", id))
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected [1, 4 + classes, anchors] output")?;

        let rows = preds.shape()[1];
        if rows <= CXYWH_OFFSET {
            return Err(anyhow!("model output has {} rows; no class scores", rows));
        }
        let side = self.input_size as f32;

        let mut candidates = Vec::new();
        for anchor in 0..preds.shape()[2] {
            let mut best = (0usize, f32::NEG_INFINITY);
            for class in 0..rows - CXYWH_OFFSET {
                let score = preds[[0, CXYWH_OFFSET + class, anchor]];
                if score > best.1 {
                    best = (class, score);
                }
            }
            let (class, confidence) = best;
            if !(confidence >= CANDIDATE_FLOOR) {
                continue;
            }
            let bbox = BoundingBox::from_center(
                preds[[0, 0, anchor]] / side,
                preds[[0, 1, anchor]] / side,
                preds[[0, 2, anchor]] / side,
                preds[[0, 3, anchor]] / side,
            )
            .clamped();
            candidates.push(Detection::new(
                bbox,
                confidence.min(1.0),
                self.class_label(class),
            ));
        }

        non_max_suppression(&mut candidates, NMS_IOU);
        Ok(candidates)
    }
}

/// Greedy NMS; leaves survivors sorted by descending confidence.
fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let same_class = xs[prev_index].class_label() == xs[index].class_label();
            if same_class && xs[prev_index].bbox().iou(xs[index].bbox()) > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&self, frame: &ImageFrame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&self) -> Result<()> {
        self.infer(&ImageFrame::blank(self.input_size, self.input_size))
            .map(|_| ())
            .context("tract warm-up inference failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_drops_overlapping_same_class_boxes() {
        let mut xs = vec![
            Detection::new(BoundingBox::new(0.1, 0.1, 0.5, 0.5), 0.6, "Human"),
            Detection::new(BoundingBox::new(0.12, 0.1, 0.5, 0.5), 0.9, "Human"),
            Detection::new(BoundingBox::new(0.6, 0.6, 0.9, 0.9), 0.7, "Human"),
        ];
        non_max_suppression(&mut xs, 0.45);
        let confidences: Vec<f32> = xs.iter().map(|d| d.confidence()).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cancel::CancelToken;
use crate::dataset::{GroundTruth, LabeledSample};
use crate::detect::{ConfidenceThreshold, Detection, FrameDetector};
use crate::error::{DetectError, DetectResult};

/// IoU thresholds averaged for AP@0.5:0.95.
pub const IOU_SWEEP: [f32; 10] = [0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.95];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// AP at the evaluation IoU threshold.
    pub average_precision: f64,
    pub average_precision_50_95: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub ground_truth_count: usize,
    pub prediction_count: usize,
    pub no_predictions: bool,
    pub no_ground_truth: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    /// Micro-averaged over all classes.
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// Mean per-class AP over classes that have ground truth.
    pub mean_average_precision: f64,
    pub mean_average_precision_50_95: f64,
    pub iou_threshold: f32,
    pub confidence_threshold: f32,
    pub samples: usize,
    /// Samples where the detector failed; scored as having no predictions.
    pub failed_samples: usize,
    pub per_class: BTreeMap<String, ClassMetrics>,
}

/// Per-class matching outcome at one IoU threshold.
#[derive(Default)]
struct ClassMatches {
    /// (confidence, is_true_positive) for every prediction.
    scored: Vec<(f32, bool)>,
    ground_truth: usize,
}

impl ClassMatches {
    fn true_positives(&self) -> usize {
        self.scored.iter().filter(|(_, tp)| *tp).count()
    }

    /// All-point interpolated average precision.
    fn average_precision(&self) -> f64 {
        if self.ground_truth == 0 {
            return 0.0;
        }
        let mut scored = self.scored.clone();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut recall = vec![0.0];
        let mut precision = vec![1.0];
        let (mut tp, mut fp) = (0usize, 0usize);
        for (_, is_tp) in &scored {
            if *is_tp {
                tp += 1;
            } else {
                fp += 1;
            }
            recall.push(tp as f64 / self.ground_truth as f64);
            precision.push(tp as f64 / (tp + fp) as f64);
        }
        recall.push(1.0);
        precision.push(0.0);

        // Precision envelope: make it monotonically non-increasing.
        for i in (0..precision.len() - 1).rev() {
            precision[i] = precision[i].max(precision[i + 1]);
        }
        recall
            .windows(2)
            .zip(&precision[1..])
            .map(|(r, p)| (r[1] - r[0]) * p)
            .sum()
    }
}

struct SampleRecord<'a> {
    predictions: Vec<Detection>,
    ground_truth: &'a [GroundTruth],
}

/// Greedy matching: predictions in descending confidence each take the
/// unmatched same-class ground truth with the highest IoU, if it reaches `iou`.
fn match_predictions(records: &[SampleRecord<'_>], iou: f32) -> BTreeMap<String, ClassMatches> {
    let mut classes: BTreeMap<String, ClassMatches> = BTreeMap::new();
    for record in records {
        for gt in record.ground_truth {
            classes.entry(gt.class_label.clone()).or_default().ground_truth += 1;
        }

        let mut order: Vec<&Detection> = record.predictions.iter().collect();
        order.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        let mut taken = vec![false; record.ground_truth.len()];

        for prediction in order {
            let best = record
                .ground_truth
                .iter()
                .enumerate()
                .filter(|(i, gt)| !taken[*i] && gt.class_label == prediction.class_label())
                .map(|(i, gt)| (i, gt.bbox.iou(prediction.bbox())))
                .filter(|(_, overlap)| *overlap >= iou)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let is_tp = match best {
                Some((i, _)) => {
                    taken[i] = true;
                    true
                }
                None => false,
            };
            classes
                .entry(prediction.class_label().to_string())
                .or_default()
                .scored
                .push((prediction.confidence(), is_tp));
        }
    }
    classes
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Scores a detector against labeled samples.
pub struct Evaluator {
    detector: FrameDetector,
}

impl Evaluator {
    pub fn new(detector: FrameDetector) -> Self {
        Self { detector }
    }

    pub fn evaluate(
        &self,
        samples: &[LabeledSample],
        threshold: ConfidenceThreshold,
        iou_threshold: f32,
    ) -> DetectResult<EvaluationMetrics> {
        self.evaluate_with(samples, threshold, iou_threshold, &CancelToken::new())
    }

    /// Run the detector over every sample and compute metrics.
    ///
    /// The IoU threshold and every ground-truth box are checked before any
    /// detection runs. Images are decoded as they are reached, so an
    /// undecodable one aborts with `DetectError::Dataset` part way through.
    /// Neither that nor cancellation (`DetectError::Cancelled`) returns
    /// partial metrics.
    pub fn evaluate_with(
        &self,
        samples: &[LabeledSample],
        threshold: ConfidenceThreshold,
        iou_threshold: f32,
        cancel: &CancelToken,
    ) -> DetectResult<EvaluationMetrics> {
        if !(iou_threshold > 0.0 && iou_threshold <= 1.0) {
            return Err(DetectError::InvalidConfig(format!(
                "IoU threshold must be in (0, 1], got {}",
                iou_threshold
            )));
        }
        if samples.is_empty() {
            return Err(DetectError::Dataset("evaluation dataset is empty".to_string()));
        }
        for sample in samples {
            if let Some(gt) = sample.ground_truth.iter().find(|gt| !gt.bbox.is_normalized()) {
                return Err(DetectError::Dataset(format!(
                    "sample {}: ground-truth box {:?} is not normalized",
                    sample.id, gt.bbox
                )));
            }
        }

        let mut records = Vec::with_capacity(samples.len());
        let mut failed_samples = 0;
        for sample in samples {
            if cancel.is_cancelled() {
                log::warn!("evaluation cancelled after {} samples", records.len());
                return Err(DetectError::Cancelled);
            }
            let frame = sample.load_image()?;
            let predictions = match self.detector.detect(&sample.id, &frame, threshold) {
                Ok(result) => result.detections().to_vec(),
                Err(e) => {
                    log::warn!("evaluation sample failed: {}", e);
                    failed_samples += 1;
                    Vec::new()
                }
            };
            records.push(SampleRecord {
                predictions,
                ground_truth: &sample.ground_truth,
            });
        }

        let primary = match_predictions(&records, iou_threshold);
        let sweep: Vec<BTreeMap<String, ClassMatches>> = IOU_SWEEP
            .iter()
            .map(|&iou| match_predictions(&records, iou))
            .collect();

        let mut per_class = BTreeMap::new();
        let (mut tp_total, mut pred_total, mut gt_total) = (0, 0, 0);
        let mut aps = Vec::new();
        let mut aps_50_95 = Vec::new();

        for (label, matches) in &primary {
            let tp = matches.true_positives();
            let predictions = matches.scored.len();
            let precision = ratio(tp, predictions);
            let recall = ratio(tp, matches.ground_truth);
            let ap = matches.average_precision();
            let ap_50_95 = mean(
                &sweep
                    .iter()
                    .map(|m| m.get(label).map_or(0.0, ClassMatches::average_precision))
                    .collect::<Vec<_>>(),
            );

            if matches.ground_truth > 0 {
                aps.push(ap);
                aps_50_95.push(ap_50_95);
            }
            tp_total += tp;
            pred_total += predictions;
            gt_total += matches.ground_truth;

            per_class.insert(
                label.clone(),
                ClassMetrics {
                    precision,
                    recall,
                    f1_score: f1(precision, recall),
                    average_precision: ap,
                    average_precision_50_95: ap_50_95,
                    true_positives: tp,
                    false_positives: predictions - tp,
                    false_negatives: matches.ground_truth - tp,
                    ground_truth_count: matches.ground_truth,
                    prediction_count: predictions,
                    no_predictions: predictions == 0,
                    no_ground_truth: matches.ground_truth == 0,
                },
            );
        }

        let precision = ratio(tp_total, pred_total);
        let recall = ratio(tp_total, gt_total);
        let metrics = EvaluationMetrics {
            precision,
            recall,
            f1_score: f1(precision, recall),
            mean_average_precision: mean(&aps),
            mean_average_precision_50_95: mean(&aps_50_95),
            iou_threshold,
            confidence_threshold: threshold.value(),
            samples: samples.len(),
            failed_samples,
            per_class,
        };
        log::info!(
            "evaluated {} samples: precision {:.4}, recall {:.4}, mAP {:.4}",
            metrics.samples,
            metrics.precision,
            metrics.recall,
            metrics.mean_average_precision
        );
        Ok(metrics)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::artifact;
use crate::error::DetectResult;
use crate::eval::EvaluationMetrics;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model artifact the metrics were computed for.
    pub model: String,
    pub backend: String,
    pub classes: Vec<String>,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverallMetrics {
    #[serde(rename = "mAP50")]
    pub map50: f64,
    #[serde(rename = "mAP50_95")]
    pub map50_95: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub iou_threshold: f32,
    pub confidence_threshold: f32,
    pub samples: usize,
    pub failed_samples: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub ap50: f64,
    pub ap50_95: f64,
    pub no_predictions: bool,
    pub no_ground_truth: bool,
}

/// Detailed evaluation report handed to renderers and written to disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model_info: ModelInfo,
    pub overall_metrics: OverallMetrics,
    pub class_metrics: BTreeMap<String, ClassReport>,
}

impl EvaluationReport {
    pub fn from_metrics(
        metrics: &EvaluationMetrics,
        model: impl Into<String>,
        backend: impl Into<String>,
        classes: Vec<String>,
    ) -> Self {
        let class_metrics = metrics
            .per_class
            .iter()
            .map(|(label, m)| {
                (
                    label.clone(),
                    ClassReport {
                        precision: m.precision,
                        recall: m.recall,
                        f1_score: m.f1_score,
                        ap50: m.average_precision,
                        ap50_95: m.average_precision_50_95,
                        no_predictions: m.no_predictions,
                        no_ground_truth: m.no_ground_truth,
                    },
                )
            })
            .collect();

        Self {
            model_info: ModelInfo {
                model: model.into(),
                backend: backend.into(),
                classes,
                date: Utc::now(),
            },
            overall_metrics: OverallMetrics {
                map50: metrics.mean_average_precision,
                map50_95: metrics.mean_average_precision_50_95,
                precision: metrics.precision,
                recall: metrics.recall,
                f1_score: metrics.f1_score,
                iou_threshold: metrics.iou_threshold,
                confidence_threshold: metrics.confidence_threshold,
                samples: metrics.samples,
                failed_samples: metrics.failed_samples,
            },
            class_metrics,
        }
    }

    pub fn write_json(&self, path: &Path) -> DetectResult<()> {
        artifact::write_json(path, self)
    }
}

mod metrics;
mod report;

pub use metrics::{ClassMetrics, EvaluationMetrics, Evaluator, IOU_SWEEP};
pub use report::{ClassReport, EvaluationReport, ModelInfo, OverallMetrics};

//! survivor_evaluate - score a model against a labelled dataset split

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use survivor_detect::dataset::YoloDataset;
use survivor_detect::detect::{load_backend, BackendKind, FrameDetector};
use survivor_detect::eval::{EvaluationReport, Evaluator};
use survivor_detect::ui::{Ui, UiMode};
use survivor_detect::{CancelToken, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Dataset root (overrides config).
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// Split to score.
    #[arg(long)]
    split: Option<String>,
    /// Report output path (overrides config).
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
    /// Model file (overrides config).
    #[arg(long)]
    model: Option<PathBuf>,
    /// IoU needed for a prediction to match ground truth (overrides config).
    #[arg(long)]
    iou: Option<f32>,
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);

    let cfg = PipelineConfig::load().context("load pipeline config")?;
    let dataset_root = args.dataset.unwrap_or_else(|| cfg.dataset.clone());
    let split = args.split.unwrap_or_else(|| cfg.evaluation.split.clone());
    let report_path = args.report.unwrap_or_else(|| cfg.evaluation.report.clone());
    let backend_kind = args.backend.unwrap_or(cfg.backend);
    let model = args.model.or_else(|| cfg.model.clone());
    let iou = args.iou.unwrap_or(cfg.inference.iou);
    let threshold = cfg.confidence_threshold()?;

    let cancel = CancelToken::new();
    cancel.install_ctrlc_handler()?;

    let dataset = YoloDataset::open(&dataset_root, &cfg.class_names)?;
    if !dataset.has_split(&split) {
        return Err(anyhow!(
            "dataset {} has no {} split",
            dataset_root.display(),
            split
        ));
    }
    let samples = {
        let _stage = ui.stage(&format!("Load {} split", split));
        dataset.load_split(&split)?
    };
    let backend = load_backend(backend_kind, model.as_deref(), &dataset.classes().to_list())?;
    let backend_name = backend.name();
    let evaluator = Evaluator::new(FrameDetector::new(backend));

    let metrics = {
        let _stage = ui.stage(&format!("Evaluate {} samples", samples.len()));
        evaluator.evaluate_with(&samples, threshold, iou, &cancel)?
    };
    let model_label = model
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| backend_kind.as_str().to_string());
    let report = EvaluationReport::from_metrics(
        &metrics,
        model_label,
        backend_name,
        dataset.classes().to_list(),
    );
    report.write_json(&report_path)?;

    eprintln!(
        "mAP@0.5 {:.3}  mAP@0.5:0.95 {:.3}  precision {:.3}  recall {:.3}  F1 {:.3}",
        metrics.mean_average_precision,
        metrics.mean_average_precision_50_95,
        metrics.precision,
        metrics.recall,
        metrics.f1_score
    );
    if metrics.failed_samples > 0 {
        log::warn!("{} samples failed detection", metrics.failed_samples);
    }
    log::info!("report written to {}", report_path.display());
    Ok(())
}

//! survivor_detect - find people in images, videos, or whole directories

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use survivor_detect::detect::{load_backend, BackendKind, FrameDetector};
use survivor_detect::media::default_video_backend;
use survivor_detect::ui::{Ui, UiMode};
use survivor_detect::{
    artifact, collect_inputs, BatchOptions, BatchProcessor, CancelToken, ConfidenceThreshold,
    PipelineConfig, VideoProcessor,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image or video files, or directories to scan.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Write annotated copies here.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Write the JSON summary here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Minimum confidence to report (overrides config).
    #[arg(long)]
    confidence: Option<f32>,
    /// Items processed concurrently (overrides config).
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
    /// Model file for backends that need one (overrides config).
    #[arg(long)]
    model: Option<PathBuf>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);

    let cfg = PipelineConfig::load().context("load pipeline config")?;
    let threshold = match args.confidence {
        Some(value) => ConfidenceThreshold::new(value)?,
        None => cfg.confidence_threshold()?,
    };
    let workers = args.workers.unwrap_or(cfg.inference.workers).max(1);
    let backend_kind = args.backend.unwrap_or(cfg.backend);
    let model = args.model.or_else(|| cfg.model.clone());

    let backend = {
        let _stage = ui.stage(&format!("Load {} backend", backend_kind.as_str()));
        load_backend(backend_kind, model.as_deref(), &cfg.resolved_class_names().to_list())?
    };
    let video = VideoProcessor::new(FrameDetector::new(backend), default_video_backend())
        .with_timeouts(cfg.media_timeouts());
    let batch = BatchProcessor::new(video).with_options(BatchOptions {
        workers,
        output_dir: args.output_dir.clone(),
    });

    let cancel = CancelToken::new();
    cancel.install_ctrlc_handler()?;

    let paths = collect_inputs(&args.inputs, args.output_dir.as_deref());
    log::info!(
        "{} inputs, {} workers, confidence {}",
        paths.len(),
        workers,
        threshold
    );

    let mut progress = ui.progress(Some(paths.len() as u64), "items");
    let summary = batch.process_batch_with(&paths, threshold, &cancel, &mut |outcome| {
        if !outcome.is_success() {
            log::warn!("{} failed", outcome.source_identifier());
        }
        progress.inc();
    });
    progress.finish();

    match &args.out {
        Some(out) => {
            artifact::write_json(out, &summary)?;
            log::info!("summary written to {}", out.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    eprintln!(
        "{} items: {} succeeded, {} failed",
        summary.total_items(),
        summary.succeeded(),
        summary.failed()
    );
    Ok(())
}

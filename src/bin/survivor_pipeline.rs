//! survivor_pipeline - run or resume the model lifecycle
//!
//! Validates the dataset, trains, evaluates and smoke-tests the model,
//! skipping every stage the run manifest already records as complete.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use survivor_detect::dataset::YoloDatasetValidator;
use survivor_detect::detect::{load_backend, BackendKind, DetectorBackend};
use survivor_detect::pipeline::{CommandTrainer, Orchestrator, PipelineStage};
use survivor_detect::ui::{Ui, UiMode};
use survivor_detect::{CancelToken, PipelineConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Dataset root (overrides config).
    #[arg(long)]
    dataset: Option<PathBuf>,
    /// Run manifest path (overrides config).
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Last stage to run.
    #[arg(long, value_enum, default_value_t = PipelineStage::InferenceReady)]
    target: PipelineStage,
    /// Backend used to load the trained model for evaluation and the smoke check.
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::for_stderr(args.ui);

    let mut cfg = PipelineConfig::load().context("load pipeline config")?;
    if let Some(dataset) = args.dataset {
        cfg.dataset = dataset;
    }
    if let Some(manifest) = args.manifest {
        cfg.manifest = manifest;
    }
    if let Some(backend) = args.backend {
        cfg.backend = backend;
    }

    let cancel = CancelToken::new();
    cancel.install_ctrlc_handler()?;

    let settings = cfg.pipeline_settings()?;
    let class_names = cfg.resolved_class_names().to_list();
    let backend_kind = cfg.backend;
    log::info!(
        "pipeline on {} (manifest {}, backend {})",
        cfg.dataset.display(),
        cfg.manifest.display(),
        backend_kind.as_str()
    );

    let loader = move |model: &Path| -> Result<Arc<dyn DetectorBackend>> {
        load_backend(backend_kind, Some(model), &class_names)
    };
    let orchestrator = Orchestrator::new(
        settings,
        cfg.manifest.clone(),
        Box::new(YoloDatasetValidator::new(cfg.class_names.clone())),
        Box::new(CommandTrainer::new(cfg.class_names.clone())),
        Box::new(loader),
    )
    .with_cancel(cancel);

    let run = {
        let _stage = ui.stage(&format!("Run pipeline to {}", args.target));
        orchestrator.run_to(args.target)?
    };
    println!("{}", serde_json::to_string_pretty(&run)?);

    if run.state.is_failed() {
        std::process::exit(1);
    }
    Ok(())
}

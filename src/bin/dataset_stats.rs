//! dataset_stats - per-split counts for a YOLO-layout dataset

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use survivor_detect::dataset::{DatasetValidator, YoloDataset, YoloDatasetValidator};
use survivor_detect::PipelineConfig;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Dataset root (overrides config).
    dataset: Option<PathBuf>,
    /// Also run the structural validator and fail if it rejects the dataset.
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = PipelineConfig::load().context("load pipeline config")?;
    let root = args.dataset.unwrap_or_else(|| cfg.dataset.clone());
    let dataset = YoloDataset::open(&root, &cfg.class_names)?;
    let stats = dataset.statistics()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if args.validate {
        YoloDatasetValidator::new(cfg.class_names.clone())
            .validate(&root)
            .with_context(|| format!("validate {}", root.display()))?;
        log::info!("{} is a valid dataset", root.display());
    }
    Ok(())
}

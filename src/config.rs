use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dataset::ClassNames;
use crate::detect::{BackendKind, ConfidenceThreshold};
use crate::media::MediaTimeouts;
use crate::pipeline::{PipelineSettings, TrainingConfig};

const DEFAULT_DATASET: &str = "dataset";
const DEFAULT_MANIFEST: &str = "pipeline_manifest.json";
const DEFAULT_IOU: f32 = 0.5;
const DEFAULT_MEDIA_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REPORT: &str = "model_evaluation_report.json";
const DEFAULT_SMOKE: &str = "inference_smoke_check.json";
const DEFAULT_EVAL_SPLIT: &str = "val";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    dataset: Option<PathBuf>,
    manifest: Option<PathBuf>,
    model: Option<PathBuf>,
    backend: Option<BackendKind>,
    class_names: Option<Vec<String>>,
    inference: Option<InferenceConfigFile>,
    training: Option<TrainingConfig>,
    evaluation: Option<EvaluationConfigFile>,
    smoke_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    confidence: Option<f32>,
    iou: Option<f32>,
    workers: Option<usize>,
    media_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EvaluationConfigFile {
    report: Option<PathBuf>,
    split: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dataset: PathBuf,
    pub manifest: PathBuf,
    /// Model used by the detect and evaluate tools when no manifest model applies.
    pub model: Option<PathBuf>,
    pub backend: BackendKind,
    pub class_names: ClassNames,
    pub inference: InferenceSettings,
    pub training: TrainingConfig,
    pub evaluation: EvaluationSettings,
    pub smoke_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub confidence: f32,
    pub iou: f32,
    pub workers: usize,
    pub media_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub report: PathBuf,
    pub split: String,
}

impl PipelineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SURVIVOR_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let inference = file.inference.unwrap_or_default();
        let evaluation = file.evaluation.unwrap_or_default();
        let class_names = match file.class_names {
            Some(names) => ClassNames::from_list(&names),
            None => ClassNames::default(),
        };
        Self {
            dataset: file.dataset.unwrap_or_else(|| PathBuf::from(DEFAULT_DATASET)),
            manifest: file.manifest.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST)),
            model: file.model,
            backend: file.backend.unwrap_or_default(),
            class_names,
            inference: InferenceSettings {
                confidence: inference
                    .confidence
                    .unwrap_or(ConfidenceThreshold::DEFAULT.value()),
                iou: inference.iou.unwrap_or(DEFAULT_IOU),
                workers: inference.workers.unwrap_or_else(default_workers),
                media_timeout: Duration::from_secs(
                    inference
                        .media_timeout_secs
                        .unwrap_or(DEFAULT_MEDIA_TIMEOUT_SECS),
                ),
            },
            training: file.training.unwrap_or_default(),
            evaluation: EvaluationSettings {
                report: evaluation
                    .report
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT)),
                split: evaluation
                    .split
                    .unwrap_or_else(|| DEFAULT_EVAL_SPLIT.to_string()),
            },
            smoke_path: file.smoke_path.unwrap_or_else(|| PathBuf::from(DEFAULT_SMOKE)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dataset) = env_nonempty("SURVIVOR_DATASET") {
            self.dataset = PathBuf::from(dataset);
        }
        if let Some(manifest) = env_nonempty("SURVIVOR_MANIFEST") {
            self.manifest = PathBuf::from(manifest);
        }
        if let Some(model) = env_nonempty("SURVIVOR_MODEL") {
            self.model = Some(PathBuf::from(model));
        }
        if let Some(confidence) = env_nonempty("SURVIVOR_CONFIDENCE") {
            self.inference.confidence = confidence
                .parse()
                .map_err(|_| anyhow!("SURVIVOR_CONFIDENCE must be a number"))?;
        }
        if let Some(iou) = env_nonempty("SURVIVOR_IOU") {
            self.inference.iou = iou
                .parse()
                .map_err(|_| anyhow!("SURVIVOR_IOU must be a number"))?;
        }
        if let Some(workers) = env_nonempty("SURVIVOR_WORKERS") {
            self.inference.workers = workers
                .parse()
                .map_err(|_| anyhow!("SURVIVOR_WORKERS must be a positive integer"))?;
        }
        if let Some(timeout) = env_nonempty("SURVIVOR_MEDIA_TIMEOUT_SECS") {
            let seconds: u64 = timeout
                .parse()
                .map_err(|_| anyhow!("SURVIVOR_MEDIA_TIMEOUT_SECS must be an integer"))?;
            self.inference.media_timeout = Duration::from_secs(seconds);
        }
        if let Some(command) = env_nonempty("SURVIVOR_TRAIN_COMMAND") {
            self.training.command = command;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        ConfidenceThreshold::new(self.inference.confidence)?;
        if !(self.inference.iou > 0.0 && self.inference.iou <= 1.0) {
            return Err(anyhow!(
                "iou threshold must be in (0, 1], got {}",
                self.inference.iou
            ));
        }
        if self.inference.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if self.inference.media_timeout.is_zero() {
            return Err(anyhow!("media timeout must be greater than zero"));
        }
        if self.class_names.is_empty() {
            return Err(anyhow!("at least one class name is required"));
        }
        if self.training.command.trim().is_empty() {
            return Err(anyhow!("training command must not be empty"));
        }
        Ok(())
    }

    pub fn confidence_threshold(&self) -> Result<ConfidenceThreshold> {
        Ok(ConfidenceThreshold::new(self.inference.confidence)?)
    }

    /// Class names from the dataset's `notes.json` when present, else the configured list.
    pub fn resolved_class_names(&self) -> ClassNames {
        ClassNames::resolve(&self.dataset, &self.class_names)
    }

    pub fn media_timeouts(&self) -> MediaTimeouts {
        MediaTimeouts::uniform(self.inference.media_timeout)
    }

    pub fn pipeline_settings(&self) -> Result<PipelineSettings> {
        Ok(PipelineSettings {
            dataset: self.dataset.clone(),
            confidence: self.confidence_threshold()?,
            iou_threshold: self.inference.iou,
            training: self.training.clone(),
            report_path: self.evaluation.report.clone(),
            smoke_path: self.smoke_path.clone(),
            class_names: self.class_names.clone(),
            eval_split: self.evaluation.split.clone(),
        })
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

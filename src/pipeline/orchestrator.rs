use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::artifact;
use crate::cancel::CancelToken;
use crate::dataset::{ClassNames, DatasetValidator, YoloDataset};
use crate::detect::{ConfidenceThreshold, DetectionResult, DetectorBackend, FrameDetector};
use crate::error::{DetectError, DetectResult, ErrorKind};
use crate::eval::{EvaluationReport, Evaluator};
use crate::frame::ImageFrame;
use crate::media;
use crate::pipeline::manifest::{ManifestStore, PipelineStage, RunManifest};
use crate::pipeline::training::{TrainingConfig, TrainingProcedure};

pub const ARTIFACT_DATASET: &str = "dataset";
pub const ARTIFACT_MODEL: &str = "model";
pub const ARTIFACT_EVALUATION_REPORT: &str = "evaluation_report";
pub const ARTIFACT_SMOKE_CHECK: &str = "smoke_check";

/// Side of the blank frame used when no validation image exists.
const SMOKE_FRAME_SIDE: u32 = 64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum PipelineState {
    NotStarted,
    DatasetValidated,
    Trained,
    Evaluated,
    InferenceReady,
    Failed {
        stage: PipelineStage,
        error_kind: ErrorKind,
        reason: String,
    },
}

impl PipelineState {
    fn completed(stage: Option<PipelineStage>) -> Self {
        match stage {
            None => PipelineState::NotStarted,
            Some(PipelineStage::DatasetValidated) => PipelineState::DatasetValidated,
            Some(PipelineStage::Trained) => PipelineState::Trained,
            Some(PipelineStage::Evaluated) => PipelineState::Evaluated,
            Some(PipelineStage::InferenceReady) => PipelineState::InferenceReady,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineState::Failed { .. })
    }
}

/// Loads a trained model artifact as a detection backend.
pub trait CapabilityLoader: Send + Sync {
    fn load(&self, model: &Path) -> anyhow::Result<Arc<dyn DetectorBackend>>;
}

impl<F> CapabilityLoader for F
where
    F: Fn(&Path) -> anyhow::Result<Arc<dyn DetectorBackend>> + Send + Sync,
{
    fn load(&self, model: &Path) -> anyhow::Result<Arc<dyn DetectorBackend>> {
        self(model)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub dataset: PathBuf,
    pub confidence: ConfidenceThreshold,
    pub iou_threshold: f32,
    pub training: TrainingConfig,
    pub report_path: PathBuf,
    pub smoke_path: PathBuf,
    pub class_names: ClassNames,
    /// Split scored in the evaluation stage.
    pub eval_split: String,
}

impl PipelineSettings {
    pub fn new(dataset: impl Into<PathBuf>) -> Self {
        Self {
            dataset: dataset.into(),
            confidence: ConfidenceThreshold::DEFAULT,
            iou_threshold: 0.5,
            training: TrainingConfig::default(),
            report_path: PathBuf::from("model_evaluation_report.json"),
            smoke_path: PathBuf::from("inference_smoke_check.json"),
            class_names: ClassNames::default(),
            eval_split: "val".to_string(),
        }
    }
}

/// Outcome of one orchestrator invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub state: PipelineState,
    pub artifacts: BTreeMap<String, PathBuf>,
    /// Stages run by this invocation, in order.
    pub executed: Vec<PipelineStage>,
    /// Stages up to the target that an earlier run had already completed.
    pub skipped: Vec<PipelineStage>,
}

#[derive(Serialize)]
struct SmokeCheck<'a> {
    model: &'a Path,
    backend: &'static str,
    source: String,
    checked_at: chrono::DateTime<Utc>,
    result: &'a DetectionResult,
}

/// Drives dataset validation, training, evaluation and the inference
/// readiness check, persisting the manifest after every successful stage.
pub struct Orchestrator {
    settings: PipelineSettings,
    manifest_path: PathBuf,
    validator: Box<dyn DatasetValidator>,
    trainer: Box<dyn TrainingProcedure>,
    loader: Box<dyn CapabilityLoader>,
    cancel: CancelToken,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        manifest_path: impl Into<PathBuf>,
        validator: Box<dyn DatasetValidator>,
        trainer: Box<dyn TrainingProcedure>,
        loader: Box<dyn CapabilityLoader>,
    ) -> Self {
        Self {
            settings,
            manifest_path: manifest_path.into(),
            validator,
            trainer,
            loader,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn run(&self) -> DetectResult<PipelineRun> {
        self.run_to(PipelineStage::InferenceReady)
    }

    /// Run every stage after the manifest's recorded stage up to `target`.
    ///
    /// A stage failure is recorded in the manifest and returned as
    /// `PipelineState::Failed`; it is not retried. `Err` is reserved for
    /// problems with the manifest itself.
    pub fn run_to(&self, target: PipelineStage) -> DetectResult<PipelineRun> {
        let store = ManifestStore::acquire(&self.manifest_path)?;
        let mut manifest = store.load_or_new()?;

        let skipped: Vec<PipelineStage> = PipelineStage::ALL
            .into_iter()
            .filter(|s| *s <= target && manifest.reached(*s))
            .collect();
        let pending: Vec<PipelineStage> = PipelineStage::ALL
            .into_iter()
            .filter(|s| *s <= target && !manifest.reached(*s))
            .collect();

        if pending.is_empty() {
            log::info!(
                "manifest already at {}; nothing to do",
                manifest.stage().map_or("NotStarted", |s| s.as_str())
            );
            return Ok(PipelineRun {
                state: PipelineState::completed(manifest.stage()),
                artifacts: manifest.artifacts().clone(),
                executed: Vec::new(),
                skipped,
            });
        }

        let mut executed = Vec::new();
        for stage in pending {
            log::info!("stage {} starting", stage);
            let outcome = if self.cancel.is_cancelled() {
                Err(DetectError::Cancelled)
            } else {
                self.execute(stage, &manifest)
            };

            match outcome {
                Ok(artifacts) => {
                    manifest.record_success(stage, artifacts);
                    store.persist(&manifest)?;
                    executed.push(stage);
                    log::info!("stage {} complete", stage);
                }
                Err(e) => {
                    log::error!("stage {} failed: {}", stage, e);
                    manifest.record_failure(stage, &e);
                    store.persist(&manifest)?;
                    return Ok(PipelineRun {
                        state: PipelineState::Failed {
                            stage,
                            error_kind: e.kind(),
                            reason: e.to_string(),
                        },
                        artifacts: manifest.artifacts().clone(),
                        executed,
                        skipped,
                    });
                }
            }
        }

        Ok(PipelineRun {
            state: PipelineState::completed(manifest.stage()),
            artifacts: manifest.artifacts().clone(),
            executed,
            skipped,
        })
    }

    fn execute(
        &self,
        stage: PipelineStage,
        manifest: &RunManifest,
    ) -> DetectResult<Vec<(String, PathBuf)>> {
        let dataset = &self.settings.dataset;
        match stage {
            PipelineStage::DatasetValidated => {
                self.validator.validate(dataset)?;
                Ok(vec![(ARTIFACT_DATASET.to_string(), dataset.clone())])
            }
            PipelineStage::Trained => {
                let model = self.trainer.train(dataset, &self.settings.training)?;
                Ok(vec![(ARTIFACT_MODEL.to_string(), model)])
            }
            PipelineStage::Evaluated => {
                let report = self.evaluate(stage, manifest)?;
                Ok(vec![(ARTIFACT_EVALUATION_REPORT.to_string(), report)])
            }
            PipelineStage::InferenceReady => {
                let smoke = self.smoke_check(stage, manifest)?;
                Ok(vec![(ARTIFACT_SMOKE_CHECK.to_string(), smoke)])
            }
        }
    }

    fn load_detector(
        &self,
        stage: PipelineStage,
        manifest: &RunManifest,
    ) -> DetectResult<(PathBuf, FrameDetector)> {
        let model = manifest
            .artifact(ARTIFACT_MODEL)
            .ok_or_else(|| DetectError::stage(stage, "no trained model recorded in the manifest"))?
            .to_path_buf();
        let backend = self
            .loader
            .load(&model)
            .map_err(|e| DetectError::stage(stage, format!("load {}: {:#}", model.display(), e)))?;
        Ok((model, FrameDetector::new(backend)))
    }

    fn evaluate(&self, stage: PipelineStage, manifest: &RunManifest) -> DetectResult<PathBuf> {
        let (model, detector) = self.load_detector(stage, manifest)?;
        let dataset = YoloDataset::open(&self.settings.dataset, &self.settings.class_names)?;
        let samples = dataset.load_split(&self.settings.eval_split)?;
        let backend = detector.backend_name();

        let metrics = Evaluator::new(detector).evaluate_with(
            &samples,
            self.settings.confidence,
            self.settings.iou_threshold,
            &self.cancel,
        )?;
        let report = EvaluationReport::from_metrics(
            &metrics,
            model.display().to_string(),
            backend,
            dataset.classes().to_list(),
        );
        report.write_json(&self.settings.report_path)?;
        Ok(self.settings.report_path.clone())
    }

    fn smoke_check(&self, stage: PipelineStage, manifest: &RunManifest) -> DetectResult<PathBuf> {
        let (model, detector) = self.load_detector(stage, manifest)?;

        let dataset = YoloDataset::open(&self.settings.dataset, &self.settings.class_names)?;
        let first = if dataset.has_split(&self.settings.eval_split) {
            dataset.images(&self.settings.eval_split)?.into_iter().next()
        } else {
            None
        };
        let (source, frame) = match first {
            Some(path) => (path.display().to_string(), media::load_image(&path)?),
            None => (
                "blank".to_string(),
                ImageFrame::blank(SMOKE_FRAME_SIDE, SMOKE_FRAME_SIDE),
            ),
        };

        let result = detector.detect(&source, &frame, self.settings.confidence)?;
        let check = SmokeCheck {
            model: &model,
            backend: detector.backend_name(),
            source,
            checked_at: Utc::now(),
            result: &result,
        };
        artifact::write_json(&self.settings.smoke_path, &check)?;
        log::info!(
            "smoke check on {}: {} detections",
            check.source,
            result.len()
        );
        Ok(self.settings.smoke_path.clone())
    }
}

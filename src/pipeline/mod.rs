//! Stage sequencing for the detection model lifecycle.

mod manifest;
mod orchestrator;
mod training;

pub use manifest::{
    load as load_manifest, ManifestStore, PipelineStage, RunManifest, StageFailure, StageRecord,
};
pub use orchestrator::{
    CapabilityLoader, Orchestrator, PipelineRun, PipelineSettings, PipelineState,
    ARTIFACT_DATASET, ARTIFACT_EVALUATION_REPORT, ARTIFACT_MODEL, ARTIFACT_SMOKE_CHECK,
};
pub use training::{CommandTrainer, TrainingConfig, TrainingProcedure};

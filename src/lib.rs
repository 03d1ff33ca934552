//! Survivor detection for disaster-scene imagery.
//!
//! Finds humans in still images and video so rescue teams can triage
//! footage from collapsed structures, floods and fires.
//!
//! # Module Structure
//!
//! - `detect`: detection capability seam, confidence filtering, result types
//! - `media`: content sniffing, image IO, video decode/encode backends
//! - `video`: lazy per-frame detection and per-video summaries
//! - `batch`: ordered multi-file processing with per-item failure isolation
//! - `dataset`: YOLO-layout datasets, labels, statistics, validation
//! - `eval`: precision/recall/AP scoring and the JSON evaluation report
//! - `pipeline`: validate → train → evaluate → ready, resumable from a manifest
//!
//! The binaries under `src/bin` wrap these with `clap`, `env_logger` and the
//! `ui` progress helpers.

pub mod artifact;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod dataset;
pub mod detect;
pub mod error;
pub mod eval;
pub mod frame;
pub mod media;
pub mod pipeline;
pub mod ui;
pub mod video;

pub use batch::{collect_inputs, BatchItemOutcome, BatchOptions, BatchProcessor, BatchSummary};
pub use cancel::CancelToken;
pub use config::PipelineConfig;
pub use detect::{
    BoundingBox, ConfidenceThreshold, Detection, DetectionResult, DetectorBackend, FrameDetector,
    FrameResult,
};
pub use error::{DetectError, DetectResult, ErrorKind};
pub use frame::ImageFrame;
pub use pipeline::{Orchestrator, PipelineRun, PipelineStage, PipelineState};
pub use video::{VideoProcessor, VideoSummary};

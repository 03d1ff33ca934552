//! Batch detection over mixed image and video inputs.
//!
//! Each input is classified by content and dispatched to the frame detector or
//! the video processor. Item failures become `Failure` outcomes; the batch
//! itself never fails. Outcomes always come back in input order.

use serde::{Deserialize, Serialize};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::bounded;
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::detect::{ConfidenceThreshold, DetectionResult};
use crate::error::{DetectError, DetectResult, ErrorKind};
use crate::frame::annotate;
use crate::media::{self, MediaKind};
use crate::video::{VideoProcessor, VideoSummary};

/// Successful per-item payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "media", rename_all = "lowercase")]
pub enum ItemReport {
    Image(DetectionResult),
    Video(VideoSummary),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItemOutcome {
    Success {
        source_identifier: String,
        report: ItemReport,
    },
    Failure {
        source_identifier: String,
        error_kind: ErrorKind,
        message: String,
    },
}

impl BatchItemOutcome {
    pub fn source_identifier(&self) -> &str {
        match self {
            BatchItemOutcome::Success {
                source_identifier, ..
            }
            | BatchItemOutcome::Failure {
                source_identifier, ..
            } => source_identifier,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchItemOutcome::Success { .. })
    }

    /// False for a video whose processing was cancelled part way through.
    pub fn is_complete(&self) -> bool {
        match self {
            BatchItemOutcome::Success {
                report: ItemReport::Video(summary),
                ..
            } => summary.is_complete(),
            _ => true,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            BatchItemOutcome::Failure { error_kind, .. } => Some(*error_kind),
            BatchItemOutcome::Success { .. } => None,
        }
    }
}

/// Aggregate of one batch run. `total_items == succeeded + failed`.
///
/// `complete` is false when items were skipped or a video was cut short.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    total_items: usize,
    succeeded: usize,
    failed: usize,
    /// Inputs handed to the batch; larger than `total_items` only when cancelled.
    requested_items: usize,
    complete: bool,
    outcomes: Vec<BatchItemOutcome>,
}

impl BatchSummary {
    fn from_outcomes(requested_items: usize, outcomes: Vec<BatchItemOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            total_items: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            requested_items,
            complete: outcomes.len() == requested_items
                && outcomes.iter().all(BatchItemOutcome::is_complete),
            outcomes,
        }
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn requested_items(&self) -> usize {
        self.requested_items
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn outcomes(&self) -> &[BatchItemOutcome] {
        &self.outcomes
    }
}

#[derive(Clone, Debug)]
pub struct BatchOptions {
    /// Worker pool bound; 1 processes items sequentially on the caller's thread.
    pub workers: usize,
    /// Where annotated copies go. `None` writes nothing.
    pub output_dir: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            output_dir: None,
        }
    }
}

pub struct BatchProcessor {
    video: VideoProcessor,
    options: BatchOptions,
}

impl BatchProcessor {
    pub fn new(video: VideoProcessor) -> Self {
        Self {
            video,
            options: BatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn process_batch(&self, paths: &[PathBuf], threshold: ConfidenceThreshold) -> BatchSummary {
        self.process_batch_with(paths, threshold, &CancelToken::new(), &mut |_| {})
    }

    /// Process `paths`, reporting each outcome to `on_item` as it finishes
    /// (completion order, which may differ from input order with workers > 1).
    pub fn process_batch_with(
        &self,
        paths: &[PathBuf],
        threshold: ConfidenceThreshold,
        cancel: &CancelToken,
        on_item: &mut dyn FnMut(&BatchItemOutcome),
    ) -> BatchSummary {
        let workers = self.options.workers.clamp(1, paths.len().max(1));
        let outcomes = if workers == 1 {
            self.run_sequential(paths, threshold, cancel, on_item)
        } else {
            self.run_parallel(paths, threshold, cancel, on_item, workers)
        };

        let summary = BatchSummary::from_outcomes(paths.len(), outcomes);
        if !summary.is_complete() {
            log::warn!(
                "batch cancelled after {} of {} items",
                summary.total_items(),
                summary.requested_items()
            );
        }
        log::info!(
            "batch finished: {} items, {} succeeded, {} failed",
            summary.total_items(),
            summary.succeeded(),
            summary.failed()
        );
        summary
    }

    fn run_sequential(
        &self,
        paths: &[PathBuf],
        threshold: ConfidenceThreshold,
        cancel: &CancelToken,
        on_item: &mut dyn FnMut(&BatchItemOutcome),
    ) -> Vec<BatchItemOutcome> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.process_item(path, threshold, cancel);
            on_item(&outcome);
            outcomes.push(outcome);
        }
        outcomes
    }

    fn run_parallel(
        &self,
        paths: &[PathBuf],
        threshold: ConfidenceThreshold,
        cancel: &CancelToken,
        on_item: &mut dyn FnMut(&BatchItemOutcome),
        workers: usize,
    ) -> Vec<BatchItemOutcome> {
        let mut slots: Vec<Option<BatchItemOutcome>> = vec![None; paths.len()];

        thread::scope(|scope| {
            let (job_tx, job_rx) = bounded::<(usize, &PathBuf)>(workers);
            let (done_tx, done_rx) = bounded::<(usize, BatchItemOutcome)>(workers);

            scope.spawn(move || {
                for job in paths.iter().enumerate() {
                    if cancel.is_cancelled() || job_tx.send(job).is_err() {
                        break;
                    }
                }
            });

            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for (index, path) in job_rx.iter() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let outcome = self.process_item(path, threshold, cancel);
                        if done_tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(done_tx);

            for (index, outcome) in done_rx.iter() {
                on_item(&outcome);
                slots[index] = Some(outcome);
            }
        });

        // Cancellation can leave holes; keep only finished items, in input order.
        slots.into_iter().flatten().collect()
    }

    fn process_item(
        &self,
        path: &Path,
        threshold: ConfidenceThreshold,
        cancel: &CancelToken,
    ) -> BatchItemOutcome {
        let source_identifier = path.display().to_string();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process_media(path, &source_identifier, threshold, cancel)
        }))
        .unwrap_or_else(|_| {
            Err(DetectError::inference(
                &source_identifier,
                "detector panicked",
            ))
        });

        match result {
            Ok(report) => BatchItemOutcome::Success {
                source_identifier,
                report,
            },
            Err(e) => {
                log::warn!("batch item failed: {}", e);
                BatchItemOutcome::Failure {
                    source_identifier,
                    error_kind: e.kind(),
                    message: e.to_string(),
                }
            }
        }
    }

    fn process_media(
        &self,
        path: &Path,
        source_identifier: &str,
        threshold: ConfidenceThreshold,
        cancel: &CancelToken,
    ) -> DetectResult<ItemReport> {
        match media::sniff_file(path)? {
            MediaKind::Image => {
                let frame = media::load_image(path)?;
                let result = self
                    .video
                    .detector()
                    .detect(source_identifier, &frame, threshold)?;
                if let Some(out) = self.output_path(path, MediaKind::Image)? {
                    media::save_image(&annotate(&frame, result.detections()), &out)?;
                }
                Ok(ItemReport::Image(result))
            }
            MediaKind::Video => {
                let out = self.output_path(path, MediaKind::Video)?;
                let summary =
                    self.video
                        .process_with(path, threshold, out.as_deref(), cancel, &mut |_| {})?;
                Ok(ItemReport::Video(summary))
            }
            MediaKind::Unknown => Err(DetectError::media_open(
                path,
                "unrecognized media content",
            )),
        }
    }

    /// Annotated output location for `input`, creating the output directory.
    fn output_path(&self, input: &Path, kind: MediaKind) -> DetectResult<Option<PathBuf>> {
        let Some(dir) = &self.options.output_dir else {
            return Ok(None);
        };
        fs::create_dir_all(dir).map_err(|e| DetectError::media_write(dir, e.to_string()))?;

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let out = match kind {
            MediaKind::Video => dir.join(format!("{}_detected.mp4", stem)),
            _ => {
                let candidate = dir.join(input.file_name().unwrap_or_default());
                if image::ImageFormat::from_path(&candidate).is_ok() {
                    candidate
                } else {
                    dir.join(format!("{}.png", stem))
                }
            }
        };
        Ok(Some(out))
    }
}

/// Expand files and directories into a sorted list of candidate inputs.
///
/// Directories are walked recursively; hidden entries and anything under
/// `exclude` (typically the output directory) are skipped. Plain file
/// arguments are kept as given, even if missing, so they surface as item
/// failures.
pub fn collect_inputs(inputs: &[PathBuf], exclude: Option<&Path>) -> Vec<PathBuf> {
    let mut collected = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            collected.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| exclude.map_or(true, |ex| !p.starts_with(ex)))
            .collect();
        found.sort();
        log::debug!("{}: {} files", input.display(), found.len());
        collected.extend(found);
    }
    collected
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_inputs_walks_directories_sorted_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::create_dir_all(root.join("detected")).unwrap();
        fs::write(root.join("b").join("2.jpg"), b"x").unwrap();
        fs::write(root.join("a.png"), b"x").unwrap();
        fs::write(root.join(".hidden.png"), b"x").unwrap();
        fs::write(root.join("detected").join("a.png"), b"x").unwrap();

        let explicit = root.join("missing.mp4");
        let inputs = collect_inputs(
            &[explicit.clone(), root.to_path_buf()],
            Some(&root.join("detected")),
        );
        assert_eq!(
            inputs,
            vec![explicit, root.join("a.png"), root.join("b").join("2.jpg")]
        );
    }

    #[test]
    fn summary_counts_add_up() {
        let outcomes = vec![
            BatchItemOutcome::Failure {
                source_identifier: "a".into(),
                error_kind: ErrorKind::MediaOpenError,
                message: "bad".into(),
            },
            BatchItemOutcome::Failure {
                source_identifier: "b".into(),
                error_kind: ErrorKind::InferenceError,
                message: "bad".into(),
            },
        ];
        let summary = BatchSummary::from_outcomes(3, outcomes);
        assert_eq!(summary.total_items(), 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.succeeded(), 0);
        assert!(!summary.is_complete());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = BatchItemOutcome::Failure {
            source_identifier: "clip.mp4".into(),
            error_kind: ErrorKind::MediaOpenError,
            message: "zero frames".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error_kind"], "MediaOpenError");
    }
}

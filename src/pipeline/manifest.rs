//! Persisted record of a pipeline run.
//!
//! The manifest is only advanced on stage success. A failure is recorded
//! beside the last successful stage, so a later run resumes from there.
//! One process owns a manifest at a time: `ManifestStore::acquire` creates
//! `<manifest>.lock` exclusively and removes it on drop.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::artifact;
use crate::error::{DetectError, DetectResult, ErrorKind};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
pub enum PipelineStage {
    DatasetValidated,
    Trained,
    Evaluated,
    InferenceReady,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::DatasetValidated,
        PipelineStage::Trained,
        PipelineStage::Evaluated,
        PipelineStage::InferenceReady,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::DatasetValidated => "DatasetValidated",
            PipelineStage::Trained => "Trained",
            PipelineStage::Evaluated => "Evaluated",
            PipelineStage::InferenceReady => "InferenceReady",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub error_kind: ErrorKind,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Last stage that completed; `None` before the first success.
    stage: Option<PipelineStage>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    artifacts: BTreeMap<String, PathBuf>,
    #[serde(default)]
    history: Vec<StageRecord>,
    #[serde(default)]
    last_failure: Option<StageFailure>,
}

impl RunManifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            stage: None,
            started_at: now,
            completed_at: None,
            updated_at: now,
            artifacts: BTreeMap::new(),
            history: Vec::new(),
            last_failure: None,
        }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        self.stage
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// True once `stage` (or a later one) has completed.
    pub fn reached(&self, stage: PipelineStage) -> bool {
        self.stage.is_some_and(|current| current >= stage)
    }

    pub fn artifact(&self, name: &str) -> Option<&Path> {
        self.artifacts.get(name).map(PathBuf::as_path)
    }

    pub fn artifacts(&self) -> &BTreeMap<String, PathBuf> {
        &self.artifacts
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    pub fn last_failure(&self) -> Option<&StageFailure> {
        self.last_failure.as_ref()
    }

    pub fn record_success(
        &mut self,
        stage: PipelineStage,
        artifacts: impl IntoIterator<Item = (String, PathBuf)>,
    ) {
        let now = Utc::now();
        self.stage = Some(stage);
        self.artifacts.extend(artifacts);
        self.history.push(StageRecord {
            stage,
            completed_at: now,
        });
        self.last_failure = None;
        self.updated_at = now;
        if stage == PipelineStage::InferenceReady {
            self.completed_at = Some(now);
        }
    }

    /// Note a failed stage. The completed stage and artifacts are untouched.
    pub fn record_failure(&mut self, stage: PipelineStage, error: &DetectError) {
        let now = Utc::now();
        self.last_failure = Some(StageFailure {
            stage,
            error_kind: error.kind(),
            reason: error.to_string(),
            at: now,
        });
        self.updated_at = now;
    }
}

impl Default for RunManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive lock file; removed on drop.
struct ManifestLock {
    path: PathBuf,
}

impl ManifestLock {
    fn acquire(path: PathBuf) -> DetectResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DetectError::stage(
                    "manifest",
                    format!(
                        "{} exists; another run holds the manifest (remove it if that run died)",
                        path.display()
                    ),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("failed to release {}: {}", self.path.display(), e);
        }
    }
}

/// Exclusive handle on a manifest file for the duration of a run.
pub struct ManifestStore {
    path: PathBuf,
    _lock: ManifestLock,
}

impl ManifestStore {
    pub fn acquire(path: &Path) -> DetectResult<Self> {
        let lock = ManifestLock::acquire(lock_path(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest, or start a fresh one if none exists yet.
    pub fn load_or_new(&self) -> DetectResult<RunManifest> {
        if !self.path.exists() {
            return Ok(RunManifest::new());
        }
        load(&self.path)
    }

    pub fn persist(&self, manifest: &RunManifest) -> DetectResult<()> {
        artifact::write_json(&self.path, manifest)?;
        log::debug!("manifest saved to {}", self.path.display());
        Ok(())
    }
}

/// Read a manifest without taking the lock (for status display).
pub fn load(path: &Path) -> DetectResult<RunManifest> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        DetectError::InvalidConfig(format!("corrupt manifest {}: {}", path.display(), e))
    })
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(PipelineStage::DatasetValidated < PipelineStage::Trained);
        assert!(PipelineStage::Evaluated < PipelineStage::InferenceReady);
    }

    #[test]
    fn failure_keeps_last_success() {
        let mut manifest = RunManifest::new();
        manifest.record_success(
            PipelineStage::DatasetValidated,
            [("dataset".to_string(), PathBuf::from("/data"))],
        );
        manifest.record_failure(
            PipelineStage::Trained,
            &DetectError::Training("exit status 1".into()),
        );
        assert_eq!(manifest.stage(), Some(PipelineStage::DatasetValidated));
        let failure = manifest.last_failure().unwrap();
        assert_eq!(failure.stage, PipelineStage::Trained);
        assert_eq!(failure.error_kind, ErrorKind::TrainingError);

        manifest.record_success(PipelineStage::Trained, Vec::<(String, PathBuf)>::new());
        assert!(manifest.last_failure().is_none());
        assert!(manifest.reached(PipelineStage::DatasetValidated));
        assert!(!manifest.reached(PipelineStage::Evaluated));
    }

    #[test]
    fn store_round_trips_and_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_manifest.json");

        {
            let store = ManifestStore::acquire(&path).unwrap();
            assert!(ManifestStore::acquire(&path).is_err());

            let mut manifest = store.load_or_new().unwrap();
            assert_eq!(manifest.stage(), None);
            manifest.record_success(
                PipelineStage::DatasetValidated,
                [("dataset".to_string(), dir.path().to_path_buf())],
            );
            store.persist(&manifest).unwrap();
        }

        assert!(!lock_path(&path).exists());
        let store = ManifestStore::acquire(&path).unwrap();
        let manifest = store.load_or_new().unwrap();
        assert_eq!(manifest.stage(), Some(PipelineStage::DatasetValidated));
        assert_eq!(manifest.artifact("dataset"), Some(dir.path()));
    }

    #[test]
    fn fresh_manifest_serializes_null_stage() {
        let json = serde_json::to_value(RunManifest::new()).unwrap();
        assert!(json["stage"].is_null());
        assert!(json["completed_at"].is_null());
    }
}

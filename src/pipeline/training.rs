use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::dataset::ClassNames;
use crate::error::{DetectError, DetectResult};

/// Parameters handed to the training procedure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Trainer executable plus any leading arguments, whitespace separated.
    pub command: String,
    pub base_model: String,
    pub epochs: u32,
    pub image_size: u32,
    pub batch: u32,
    pub project_dir: PathBuf,
    pub run_name: String,
    /// Where the ONNX export of the best weights is copied once training finishes.
    pub model_artifact: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            command: "yolo".to_string(),
            base_model: "yolov8n.pt".to_string(),
            epochs: 50,
            image_size: 640,
            batch: 16,
            project_dir: PathBuf::from("training_outputs"),
            run_name: "human_detection_disaster".to_string(),
            model_artifact: PathBuf::from("human_detection_disaster_model.onnx"),
        }
    }
}

impl TrainingConfig {
    /// `<project>/<run>/weights/best.pt`, where the trainer leaves its best checkpoint.
    pub fn best_weights(&self) -> PathBuf {
        self.project_dir
            .join(&self.run_name)
            .join("weights")
            .join("best.pt")
    }

    /// `best.onnx` beside the best checkpoint, written by the export step.
    pub fn exported_weights(&self) -> PathBuf {
        self.best_weights().with_extension("onnx")
    }
}

/// External training step: dataset in, trained model artifact out.
pub trait TrainingProcedure: Send + Sync {
    fn train(&self, dataset: &Path, config: &TrainingConfig) -> DetectResult<PathBuf>;
}

/// Runs an Ultralytics-style CLI trainer as a child process.
///
/// Uses `<dataset>/data.yaml` when present; otherwise a dataset config is
/// generated next to the run directory.
#[derive(Clone, Debug, Default)]
pub struct CommandTrainer {
    classes: ClassNames,
}

impl CommandTrainer {
    pub fn new(classes: ClassNames) -> Self {
        Self { classes }
    }

    fn data_config(&self, dataset: &Path, config: &TrainingConfig) -> DetectResult<PathBuf> {
        let existing = dataset.join("data.yaml");
        if existing.is_file() {
            return Ok(existing);
        }

        let root = fs::canonicalize(dataset)
            .map_err(|e| DetectError::Training(format!("dataset {}: {}", dataset.display(), e)))?;
        let classes = ClassNames::resolve(dataset, &self.classes);
        let mut yaml = format!(
            "path: {}\ntrain: train/images\nval: val/images\n",
            yaml_quote(&root.display().to_string())
        );
        if dataset.join("test").join("images").is_dir() {
            yaml.push_str("test: test/images\n");
        }
        yaml.push_str("names:\n");
        for (id, name) in classes.iter() {
            yaml.push_str(&format!("  {}: {}\n", id, yaml_quote(name)));
        }

        fs::create_dir_all(&config.project_dir)?;
        let path = config
            .project_dir
            .join(format!("{}.data.yaml", config.run_name));
        fs::write(&path, yaml)?;
        Ok(path)
    }
}

fn yaml_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl TrainingProcedure for CommandTrainer {
    fn train(&self, dataset: &Path, config: &TrainingConfig) -> DetectResult<PathBuf> {
        let data = self.data_config(dataset, config)?;

        let mut command = trainer_command(config, "train")?;
        command
            .arg(format!("model={}", config.base_model))
            .arg(format!("data={}", data.display()))
            .arg(format!("epochs={}", config.epochs))
            .arg(format!("imgsz={}", config.image_size))
            .arg(format!("batch={}", config.batch))
            .arg(format!("project={}", config.project_dir.display()))
            .arg(format!("name={}", config.run_name))
            .arg("exist_ok=True");
        run_trainer(command)?;

        let best = config.best_weights();
        if !best.is_file() {
            return Err(DetectError::Training(format!(
                "trainer finished but {} is missing",
                best.display()
            )));
        }

        // The inference backend reads ONNX, not the PyTorch checkpoint.
        let mut export = trainer_command(config, "export")?;
        export
            .arg(format!("model={}", best.display()))
            .arg("format=onnx")
            .arg(format!("imgsz={}", config.image_size));
        run_trainer(export)?;

        let exported = config.exported_weights();
        if !exported.is_file() {
            return Err(DetectError::Training(format!(
                "export finished but {} is missing",
                exported.display()
            )));
        }
        if let Some(parent) = config
            .model_artifact
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&exported, &config.model_artifact).map_err(|e| {
            DetectError::Training(format!(
                "copy {} to {}: {}",
                exported.display(),
                config.model_artifact.display(),
                e
            ))
        })?;
        log::info!("exported model copied to {}", config.model_artifact.display());
        Ok(config.model_artifact.clone())
    }
}

/// `<command...> detect <mode>`, ready for mode arguments.
fn trainer_command(config: &TrainingConfig, mode: &str) -> DetectResult<Command> {
    let mut parts = config.command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| DetectError::Training("trainer command is empty".to_string()))?;
    let mut command = Command::new(program);
    command.args(parts).args(["detect", mode]);
    Ok(command)
}

fn run_trainer(mut command: Command) -> DetectResult<()> {
    log::info!("running trainer: {:?}", command);
    let program = command.get_program().to_string_lossy().into_owned();
    let status = command
        .status()
        .map_err(|e| DetectError::Training(format!("cannot run {}: {}", program, e)))?;
    if !status.success() {
        return Err(DetectError::Training(format!("{} exited with {}", program, status)));
    }
    Ok(())
}

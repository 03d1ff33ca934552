use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use survivor_detect::detect::BackendKind;
use survivor_detect::PipelineConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SURVIVOR_CONFIG",
        "SURVIVOR_DATASET",
        "SURVIVOR_MANIFEST",
        "SURVIVOR_MODEL",
        "SURVIVOR_CONFIDENCE",
        "SURVIVOR_IOU",
        "SURVIVOR_WORKERS",
        "SURVIVOR_MEDIA_TIMEOUT_SECS",
        "SURVIVOR_TRAIN_COMMAND",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_follow_the_training_tooling() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load defaults");
    assert_eq!(cfg.dataset, PathBuf::from("dataset"));
    assert_eq!(cfg.backend, BackendKind::Stub);
    assert_eq!(cfg.class_names.to_list(), vec!["Human".to_string()]);
    assert_eq!(cfg.inference.confidence, 0.5);
    assert_eq!(cfg.inference.iou, 0.5);
    assert!(cfg.inference.workers >= 1);
    assert_eq!(cfg.inference.media_timeout, Duration::from_secs(30));
    assert_eq!(cfg.training.epochs, 50);
    assert_eq!(cfg.training.image_size, 640);
    assert_eq!(cfg.training.batch, 16);
    assert_eq!(cfg.training.run_name, "human_detection_disaster");
    assert_eq!(
        cfg.training.model_artifact,
        PathBuf::from("human_detection_disaster_model.onnx")
    );
    assert_eq!(cfg.evaluation.report, PathBuf::from("model_evaluation_report.json"));
    assert_eq!(cfg.evaluation.split, "val");
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "dataset": "/data/disaster",
        "manifest": "/runs/manifest.json",
        "backend": "tract",
        "class_names": ["Human", "Dog"],
        "inference": {
            "confidence": 0.35,
            "iou": 0.6,
            "workers": 4,
            "media_timeout_secs": 10
        },
        "training": {
            "epochs": 80,
            "batch": 8
        },
        "evaluation": {
            "report": "/runs/report.json",
            "split": "test"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SURVIVOR_CONFIG", file.path());
    std::env::set_var("SURVIVOR_CONFIDENCE", "0.7");
    std::env::set_var("SURVIVOR_WORKERS", "2");
    std::env::set_var("SURVIVOR_MODEL", "/models/best.onnx");
    std::env::set_var("SURVIVOR_TRAIN_COMMAND", "python -m ultralytics");

    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.dataset, PathBuf::from("/data/disaster"));
    assert_eq!(cfg.manifest, PathBuf::from("/runs/manifest.json"));
    assert_eq!(cfg.backend, BackendKind::Tract);
    assert_eq!(cfg.class_names.label(1), "Dog");
    assert_eq!(cfg.inference.confidence, 0.7);
    assert_eq!(cfg.inference.iou, 0.6);
    assert_eq!(cfg.inference.workers, 2);
    assert_eq!(cfg.inference.media_timeout, Duration::from_secs(10));
    assert_eq!(cfg.model, Some(PathBuf::from("/models/best.onnx")));
    assert_eq!(cfg.training.epochs, 80);
    assert_eq!(cfg.training.batch, 8);
    assert_eq!(cfg.training.image_size, 640);
    assert_eq!(cfg.training.command, "python -m ultralytics");
    assert_eq!(cfg.evaluation.split, "test");

    let settings = cfg.pipeline_settings().expect("settings");
    assert_eq!(settings.confidence.value(), 0.7);
    assert_eq!(settings.eval_split, "test");
    assert_eq!(settings.report_path, PathBuf::from("/runs/report.json"));

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
dataset = "flood_frames"
smoke_path = "checks/smoke.json"

[inference]
iou = 0.45

[training]
run_name = "flood_v2"
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("SURVIVOR_CONFIG", file.path());

    let cfg = PipelineConfig::load().expect("load toml config");
    assert_eq!(cfg.dataset, PathBuf::from("flood_frames"));
    assert_eq!(cfg.smoke_path, PathBuf::from("checks/smoke.json"));
    assert_eq!(cfg.inference.iou, 0.45);
    assert_eq!(cfg.training.run_name, "flood_v2");
    assert_eq!(cfg.training.epochs, 50);

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for (key, value) in [
        ("SURVIVOR_CONFIDENCE", "0"),
        ("SURVIVOR_CONFIDENCE", "1.5"),
        ("SURVIVOR_IOU", "0"),
        ("SURVIVOR_WORKERS", "0"),
        ("SURVIVOR_MEDIA_TIMEOUT_SECS", "0"),
        ("SURVIVOR_WORKERS", "many"),
    ] {
        std::env::set_var(key, value);
        assert!(
            PipelineConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
        std::env::remove_var(key);
    }

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"class_names": []}"#).expect("write config");
    std::env::set_var("SURVIVOR_CONFIG", file.path());
    assert!(PipelineConfig::load().is_err());

    clear_env();
}

#[test]
fn dataset_notes_override_configured_class_names() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dataset = tempfile::tempdir().expect("temp dataset");
    std::env::set_var("SURVIVOR_DATASET", dataset.path());
    let cfg = PipelineConfig::load().expect("load config");
    assert_eq!(cfg.resolved_class_names().to_list(), vec!["Human".to_string()]);

    std::fs::write(
        dataset.path().join("notes.json"),
        r#"{"categories":[{"id":0,"name":"person"},{"id":1,"name":"dog"}]}"#,
    )
    .expect("write notes");
    assert_eq!(
        cfg.resolved_class_names().to_list(),
        vec!["person".to_string(), "dog".to_string()]
    );
    assert_eq!(cfg.class_names.to_list(), vec!["Human".to_string()]);

    clear_env();
}

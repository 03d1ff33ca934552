use std::fs;
use std::path::Path;
use std::sync::Arc;

use survivor_detect::dataset::{ClassNames, GroundTruth, LabeledSample, YoloDataset};
use survivor_detect::detect::StubBackend;
use survivor_detect::eval::{EvaluationReport, Evaluator};
use survivor_detect::media;
use survivor_detect::{BoundingBox, ConfidenceThreshold, Detection, FrameDetector, ImageFrame};

fn shaded(shade: u8) -> ImageFrame {
    ImageFrame::from_raw(6, 6, vec![shade; 6 * 6 * 3]).unwrap()
}

fn human_box() -> BoundingBox {
    BoundingBox::new(0.3, 0.2, 0.7, 0.8)
}

#[test]
fn eight_of_ten_found_gives_full_precision_and_partial_recall() {
    let mut backend = StubBackend::new();
    let mut samples = Vec::new();
    for i in 0..10u8 {
        let frame = shaded(i * 20);
        if i < 8 {
            let confidence = 0.95 - f32::from(i) * 0.05;
            backend = backend.respond_to(&frame, vec![Detection::new(human_box(), confidence, "Human")]);
        }
        samples.push(LabeledSample::in_memory(
            format!("img_{i}"),
            frame,
            vec![GroundTruth::new(human_box(), "Human")],
        ));
    }

    let evaluator = Evaluator::new(FrameDetector::new(Arc::new(backend)));
    let metrics = evaluator
        .evaluate(&samples, ConfidenceThreshold::DEFAULT, 0.5)
        .unwrap();

    assert_eq!(metrics.samples, 10);
    assert_eq!(metrics.failed_samples, 0);
    assert!((metrics.precision - 1.0).abs() < 1e-9);
    assert!((metrics.recall - 0.8).abs() < 1e-9);
    assert!((metrics.mean_average_precision - 0.8).abs() < 1e-9);
    assert!((metrics.f1_score - 2.0 * 0.8 / 1.8).abs() < 1e-9);

    let human = &metrics.per_class["Human"];
    assert_eq!(human.true_positives, 8);
    assert_eq!(human.false_positives, 0);
    assert_eq!(human.false_negatives, 2);
    assert_eq!(human.ground_truth_count, 10);
    assert!(!human.no_predictions);
    // Identical boxes match at every IoU in the sweep.
    assert!((human.average_precision_50_95 - 0.8).abs() < 1e-9);
}

#[test]
fn confidence_threshold_drops_weak_predictions_before_scoring() {
    let frame = shaded(77);
    let backend = StubBackend::new().respond_to(
        &frame,
        vec![Detection::new(human_box(), 0.3, "Human")],
    );
    let samples = vec![LabeledSample::in_memory(
        "weak",
        frame,
        vec![GroundTruth::new(human_box(), "Human")],
    )];

    let metrics = Evaluator::new(FrameDetector::new(Arc::new(backend)))
        .evaluate(&samples, ConfidenceThreshold::DEFAULT, 0.5)
        .unwrap();
    assert_eq!(metrics.recall, 0.0);
    assert_eq!(metrics.precision, 0.0);
    assert!(metrics.per_class["Human"].no_predictions);
}

fn write_sample(root: &Path, split: &str, name: &str, frame: &ImageFrame, label: &str) {
    let images = root.join(split).join("images");
    let labels = root.join(split).join("labels");
    fs::create_dir_all(&images).unwrap();
    fs::create_dir_all(&labels).unwrap();
    media::save_image(frame, &images.join(format!("{name}.png"))).unwrap();
    fs::write(labels.join(format!("{name}.txt")), label).unwrap();
}

#[test]
fn dataset_on_disk_produces_a_report() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let found = shaded(10);
    let missed = shaded(240);
    write_sample(root, "val", "found", &found, "0 0.5 0.5 0.4 0.6\n");
    write_sample(root, "val", "missed", &missed, "0 0.5 0.5 0.4 0.6\n");
    fs::write(
        root.join("notes.json"),
        r#"{"categories":[{"id":0,"name":"Survivor"}]}"#,
    )
    .unwrap();

    let dataset = YoloDataset::open(root, &ClassNames::default()).unwrap();
    assert_eq!(dataset.classes().to_list(), vec!["Survivor".to_string()]);
    let samples = dataset.load_split("val").unwrap();
    assert_eq!(samples.len(), 2);

    let backend = StubBackend::new().respond_to(
        &found,
        vec![Detection::new(human_box(), 0.9, "Survivor")],
    );
    let metrics = Evaluator::new(FrameDetector::new(Arc::new(backend)))
        .evaluate(&samples, ConfidenceThreshold::DEFAULT, 0.5)
        .unwrap();
    assert!((metrics.recall - 0.5).abs() < 1e-9);

    let report = EvaluationReport::from_metrics(
        &metrics,
        "human_detection_disaster_model.onnx",
        "stub",
        dataset.classes().to_list(),
    );
    let report_path = root.join("reports").join("model_evaluation_report.json");
    report.write_json(&report_path).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(json["model_info"]["classes"][0], "Survivor");
    assert_eq!(json["overall_metrics"]["recall"], 0.5);
    assert_eq!(json["class_metrics"]["Survivor"]["precision"], 1.0);
}

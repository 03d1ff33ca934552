use std::path::Path;
use std::sync::Arc;

use survivor_detect::detect::StubBackend;
use survivor_detect::media::{SyntheticClip, SyntheticVideoBackend};
use survivor_detect::{
    BoundingBox, CancelToken, ConfidenceThreshold, Detection, ErrorKind, FrameDetector,
    VideoProcessor,
};

fn person(confidence: f32) -> Detection {
    Detection::new(BoundingBox::new(0.1, 0.2, 0.3, 0.8), confidence, "Human")
}

fn processor(backend: StubBackend, video: SyntheticVideoBackend) -> VideoProcessor {
    VideoProcessor::new(FrameDetector::new(Arc::new(backend)), Arc::new(video))
}

#[test]
fn corrupt_frame_is_recorded_and_processing_continues() {
    let path = Path::new("collapse.mp4");
    let clip = SyntheticClip::new(5, 16, 12).with_corrupt_frame(2);
    let video = SyntheticVideoBackend::new().with_clip(path, clip);
    let vp = processor(StubBackend::new().with_default(vec![person(0.8)]), video);

    let frames: Vec<_> = vp
        .frames(path, ConfidenceThreshold::DEFAULT)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(frames.len(), 5);
    let indices: Vec<u64> = frames.iter().map(|f| f.frame_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert!(frames[2].is_failed());
    assert_eq!(
        frames[2].failure().map(|f| f.error_kind),
        Some(ErrorKind::MediaOpenError)
    );
    assert!(frames[2].detections().is_empty());

    let summary = vp.process(path, ConfidenceThreshold::DEFAULT, None).unwrap();
    assert_eq!(summary.total_frames(), 5);
    assert_eq!(summary.failed_frames(), 1);
    assert_eq!(summary.total_detections(), 4);
    assert!((summary.avg_detections_per_frame() - 0.8).abs() < 1e-9);
}

#[test]
fn threshold_filters_every_frame() {
    let path = Path::new("flood.mp4");
    let video = SyntheticVideoBackend::new().with_clip(path, SyntheticClip::new(3, 8, 8));
    let vp = processor(
        StubBackend::new().with_default(vec![person(0.9), person(0.4), person(0.6)]),
        video,
    );

    let threshold = ConfidenceThreshold::new(0.55).unwrap();
    for frame in vp.frames(path, threshold).unwrap() {
        let frame = frame.unwrap();
        let confidences: Vec<f32> = frame.detections().iter().map(|d| d.confidence()).collect();
        assert_eq!(confidences, vec![0.9, 0.6]);
    }
}

#[test]
fn zero_frame_video_is_a_media_open_error() {
    let path = Path::new("empty.mp4");
    let video = SyntheticVideoBackend::new().with_clip(path, SyntheticClip::new(0, 8, 8));
    let vp = processor(StubBackend::new(), video);

    let err = vp.process(path, ConfidenceThreshold::DEFAULT, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MediaOpenError);
}

#[test]
fn unopenable_video_is_a_media_open_error() {
    let vp = processor(StubBackend::new(), SyntheticVideoBackend::new());
    let err = vp
        .process(Path::new("nowhere.mp4"), ConfidenceThreshold::DEFAULT, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MediaOpenError);
}

#[test]
fn annotated_output_gets_every_frame() {
    let path = Path::new("fire.mp4");
    let out = Path::new("fire_detected.mp4");
    let clip = SyntheticClip::new(6, 8, 8).with_corrupt_frame(0);
    let video = SyntheticVideoBackend::new().with_clip(path, clip);
    let vp = processor(StubBackend::new().with_default(vec![person(0.7)]), video.clone());

    let summary = vp
        .process(path, ConfidenceThreshold::DEFAULT, Some(out))
        .unwrap();
    assert_eq!(summary.output_path(), Some(out));
    assert_eq!(video.frames_written(out), 6);
    assert!(video.is_finished(out));
}

#[test]
fn failed_output_write_is_a_media_write_error() {
    let path = Path::new("quake.mp4");
    let out = Path::new("quake_detected.mp4");
    let video = SyntheticVideoBackend::new()
        .with_clip(path, SyntheticClip::new(5, 8, 8))
        .failing_sink_after(2);
    let vp = processor(StubBackend::new(), video);

    let err = vp
        .process(path, ConfidenceThreshold::DEFAULT, Some(out))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MediaWriteError);
}

#[test]
fn cancellation_returns_partial_summary() {
    let path = Path::new("long.mp4");
    let video = SyntheticVideoBackend::new().with_clip(path, SyntheticClip::new(50, 8, 8));
    let vp = processor(StubBackend::new().with_default(vec![person(0.9)]), video);

    let cancel = CancelToken::new();
    let mut seen = 0u64;
    let summary = vp
        .process_with(path, ConfidenceThreshold::DEFAULT, None, &cancel, &mut |_| {
            seen += 1;
            if seen == 3 {
                cancel.cancel();
            }
        })
        .unwrap();
    assert!(!summary.is_complete());
    assert_eq!(summary.total_frames(), 3);
    assert_eq!(summary.total_detections(), 3);
}

#[test]
fn restart_begins_again_at_frame_zero() {
    let path = Path::new("loop.mp4");
    let clip = SyntheticClip::new(3, 8, 8).with_seed(11);
    let video = SyntheticVideoBackend::new().with_clip(path, clip.clone());
    let marked = clip.frame(1);
    let backend = StubBackend::new().respond_to(&marked, vec![person(0.75)]);
    let vp = processor(backend, video);

    let mut frames = vp.frames(path, ConfidenceThreshold::DEFAULT).unwrap();
    let first: Vec<usize> = frames.by_ref().map(|f| f.unwrap().detections().len()).collect();
    assert_eq!(first, vec![0, 1, 0]);
    assert!(frames.next().is_none());

    frames.restart().unwrap();
    let again: Vec<u64> = frames.map(|f| f.unwrap().frame_index).collect();
    assert_eq!(again, vec![0, 1, 2]);
}

#[test]
fn detector_failure_on_one_frame_keeps_the_stream_going() {
    let path = Path::new("aftershock.mp4");
    let clip = SyntheticClip::new(4, 8, 8).with_seed(7);
    let video = SyntheticVideoBackend::new().with_clip(path, clip.clone());
    let backend = StubBackend::new()
        .with_default(vec![person(0.9)])
        .fail_on(&clip.frame(1), "tensor shape mismatch");
    let vp = processor(backend, video);

    let frames: Vec<_> = vp
        .frames(path, ConfidenceThreshold::DEFAULT)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let indices: Vec<u64> = frames.iter().map(|f| f.frame_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert!(frames[1].is_failed());
    assert_eq!(
        frames[1].failure().map(|f| f.error_kind),
        Some(ErrorKind::InferenceError)
    );
    assert!(frames[1].detections().is_empty());
    for i in [0, 2, 3] {
        assert!(!frames[i].is_failed());
        assert_eq!(frames[i].detections().len(), 1);
    }

    let summary = vp.process(path, ConfidenceThreshold::DEFAULT, None).unwrap();
    assert!(summary.is_complete());
    assert_eq!(summary.total_frames(), 4);
    assert_eq!(summary.failed_frames(), 1);
    assert_eq!(summary.total_detections(), 3);
}

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::detect::backend::DetectorBackend;
use crate::detect::Detection;
use crate::frame::ImageFrame;

#[derive(Clone, Debug)]
enum StubResponse {
    Detections(Vec<Detection>),
    Fail(String),
}

/// Scripted backend for tests and dry runs.
///
/// Responses are keyed by the SHA-256 of the frame content, so the same
/// pixels always get the same answer no matter which worker asks.
#[derive(Debug)]
pub struct StubBackend {
    responses: HashMap<[u8; 32], StubResponse>,
    default: StubResponse,
    calls: AtomicUsize,
}

impl StubBackend {
    /// Backend that finds nothing in any frame.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default: StubResponse::Detections(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer every unscripted frame with `detections`.
    pub fn with_default(mut self, detections: Vec<Detection>) -> Self {
        self.default = StubResponse::Detections(detections);
        self
    }

    /// Answer frames with this exact content with `detections`.
    pub fn respond_to(mut self, frame: &ImageFrame, detections: Vec<Detection>) -> Self {
        self.responses
            .insert(frame.content_hash(), StubResponse::Detections(detections));
        self
    }

    /// Fail inference on frames with this exact content.
    pub fn fail_on(mut self, frame: &ImageFrame, message: impl Into<String>) -> Self {
        self.responses
            .insert(frame.content_hash(), StubResponse::Fail(message.into()));
        self
    }

    /// Number of `infer` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&self, frame: &ImageFrame) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .get(&frame.content_hash())
            .unwrap_or(&self.default);
        match response {
            StubResponse::Detections(detections) => Ok(detections.clone()),
            StubResponse::Fail(message) => Err(anyhow!("{}", message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn scripted_frames_override_default() {
        let person = Detection::new(BoundingBox::new(0.1, 0.1, 0.3, 0.5), 0.9, "Human");
        let special = ImageFrame::from_raw(1, 1, vec![9, 9, 9]).unwrap();
        let backend = StubBackend::new()
            .with_default(vec![])
            .respond_to(&special, vec![person.clone()]);

        assert_eq!(backend.infer(&special).unwrap(), vec![person]);
        assert!(backend.infer(&ImageFrame::blank(1, 1)).unwrap().is_empty());
        assert_eq!(backend.call_count(), 2);
    }
}

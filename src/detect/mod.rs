mod backend;
mod backends;
mod detector;
mod result;

pub use backend::DetectorBackend;
pub use backends::{load_backend, BackendKind, StubBackend};
pub use detector::{ConfidenceThreshold, FrameDetector};
pub use result::{BoundingBox, Detection, DetectionResult, FrameFailure, FrameResult};

#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;

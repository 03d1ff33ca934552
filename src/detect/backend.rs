use anyhow::Result;

use crate::detect::Detection;
use crate::frame::ImageFrame;

/// Detection capability: image in, ordered boxes out.
///
/// # Contract
///
/// - `infer` is synchronous and may be slow; callers never assume GPU/CPU specifics.
/// - Output order is the backend's own ranking and is preserved downstream.
/// - Implementations hold loaded weights read-only. One instance is shared by
///   every batch worker, hence `&self` and `Send + Sync`.
/// - Implementations must not keep the pixel slice beyond the call.
///
/// Malformed output (boxes outside `[0, 1]`, NaN confidence) is rejected by
/// `FrameDetector`, not here.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one frame.
    fn infer(&self, frame: &ImageFrame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::detect::DetectorBackend;

pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

/// Which detector implementation to load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Scripted backend; finds nothing unless told otherwise.
    #[default]
    Stub,
    /// ONNX model run through tract (feature `backend-tract`).
    Tract,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Stub => "stub",
            BackendKind::Tract => "tract",
        }
    }
}

/// Build a shared detector backend.
///
/// `model_path` is required for `tract` and ignored for `stub`.
pub fn load_backend(
    kind: BackendKind,
    model_path: Option<&Path>,
    class_names: &[String],
) -> Result<Arc<dyn DetectorBackend>> {
    match kind {
        BackendKind::Stub => Ok(Arc::new(StubBackend::new())),
        BackendKind::Tract => load_tract(model_path, class_names),
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(
    model_path: Option<&Path>,
    class_names: &[String],
) -> Result<Arc<dyn DetectorBackend>> {
    let Some(path) = model_path else {
        bail!("tract backend requires a model path");
    };
    let backend = TractBackend::new(path, tract::DEFAULT_INPUT_SIZE, class_names.to_vec())?;
    backend.warm_up()?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(
    _model_path: Option<&Path>,
    _class_names: &[String],
) -> Result<Arc<dyn DetectorBackend>> {
    bail!("tract backend requires the backend-tract feature")
}

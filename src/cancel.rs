use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a long-running operation and
/// whoever may stop it (Ctrl-C handler, UI, tests).
///
/// Checked at frame, item and sample boundaries; never interrupts a detection
/// call that is already running.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Route Ctrl-C to this token. Only one handler may be installed per process.
    pub fn install_ctrlc_handler(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received; finishing current frame/item");
            token.cancel();
        })
        .context("install Ctrl-C handler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}

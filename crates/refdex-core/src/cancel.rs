//! Cancellation: a process-wide shutdown flag plus per-run cancel flags

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Global shutdown flag, set by the SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers).
///
/// Returns `true` if shutdown had already been requested.
pub fn request_shutdown() -> bool {
    shutdown_flag().swap(true, Ordering::Relaxed)
}

/// Shared cancellation signal for one pipeline run.
///
/// Raised once by whichever branch fails first; every clone observes it.
/// A requested process shutdown counts as cancellation too.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` if this call was the one that raised it.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) || is_shutdown_requested()
    }
}

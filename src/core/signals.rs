//! Process-wide termination/cancellation flags (spec §6.4, §9 "Process-wide
//! state"). `my_id` is ordinary startup configuration and lives in
//! [`crate::config::Config`]; only the two signal-set flags belong here.

use crate::core::errors::ShardlordError;
use signal_hook::consts::{SIGTERM, SIGUSR1};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-writer (the signal handler), multi-reader (the executor loop)
/// flags. Cloning shares the underlying atomics.
#[derive(Clone)]
pub struct SignalFlags {
    terminate: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Registers the process's `SIGTERM`/`SIGUSR1` handlers. Must be
    /// called once at startup, before the executor loop begins.
    pub fn install() -> Result<Self, ShardlordError> {
        let terminate = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, Arc::clone(&terminate))
            .map_err(|e| ShardlordError::Internal(format!("failed to install SIGTERM handler: {e}")))?;
        signal_hook::flag::register(SIGUSR1, Arc::clone(&cancel))
            .map_err(|e| ShardlordError::Internal(format!("failed to install SIGUSR1 handler: {e}")))?;
        Ok(Self { terminate, cancel })
    }

    /// A set of flags with no OS signal handler installed, for tests that
    /// want to simulate a signal by calling [`SignalFlags::raise_terminate`]
    /// / [`SignalFlags::raise_cancel`] directly.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            terminate: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn terminate_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn any_pending(&self) -> bool {
        self.terminate_requested() || self.cancel_requested()
    }

    #[cfg(test)]
    pub fn raise_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub fn raise_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

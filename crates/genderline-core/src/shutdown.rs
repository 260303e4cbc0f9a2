//! Graceful shutdown support via atomic flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared stop flag, owned by the run context and set by signal handlers
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Request shutdown; returns whether it had already been requested
    pub fn request(&self) -> bool {
        self.0.swap(true, Ordering::Relaxed)
    }
}

/// First SIGINT/SIGTERM requests a graceful stop, the second exits with 130.
pub fn install_signal_handlers(flag: &ShutdownFlag) -> std::io::Result<()> {
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let flag = flag.clone();
        // SAFETY: the handler allocates nothing and takes no locks; it swaps
        // an AtomicBool and may exit the process.
        unsafe {
            signal_hook::low_level::register(signal, move || {
                if flag.request() {
                    std::process::exit(130);
                }
            })?;
        }
    }
    Ok(())
}

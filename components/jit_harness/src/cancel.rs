//! Batch-wide cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

/// Shared flag tripped by Ctrl-C or programmatically
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Trip this token on the first Ctrl-C.
    ///
    /// The signal is awaited on a detached thread running a current-thread
    /// tokio runtime.
    pub fn cancel_on_ctrl_c(&self) -> std::io::Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let token = self.clone();
        thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => {
                            info!("interrupt received, cancelling batch");
                            token.cancel();
                        }
                        Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
                    }
                })
            })?;
        Ok(())
    }
}

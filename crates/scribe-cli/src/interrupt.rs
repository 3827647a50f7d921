//! Ctrl-C handling
//!
//! The signal only raises a flag. The agent loop checks it between
//! iterations, so an in-flight request or tool call always completes.
//! A second Ctrl-C exits at once with code 130.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::EXIT_INTERRUPTED;

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Raise the flag; true when it was already raised
    fn signal(&self) -> bool {
        self.raised.swap(true, Ordering::SeqCst)
    }

    /// Spawn a task that raises the flag on Ctrl-C and exits on the second
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    return;
                }
                if flag.signal() {
                    warn!("Second Ctrl-C, exiting immediately");
                    std::process::exit(EXIT_INTERRUPTED);
                }
                debug!("Received Ctrl-C");
                warn!("Stopping after the current iteration, press Ctrl-C again to exit now");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(!other.is_raised());
        flag.raise();
        assert!(other.is_raised());
    }

    #[test]
    fn test_second_signal_is_reported() {
        let flag = InterruptFlag::new();
        assert!(!flag.signal());
        assert!(flag.is_raised());
        assert!(flag.signal());
    }
}

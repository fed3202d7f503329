//! Interrupt handling (SIGINT/SIGTERM)
//!
//! The running child process gets the terminal's interrupt directly. The
//! handler here only records that an interrupt happened so the pipeline can
//! stop at the next stage or step boundary and exit with 130.
//!
//! A second interrupt exits the process immediately with the same code.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for interrupted runs (128 + SIGINT)
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Interrupt state shared between the handler and the pipeline
#[derive(Debug, Default)]
pub struct InterruptState {
    /// First signal received
    interrupted: AtomicBool,
    /// Signal count (for tracking double-SIGINT)
    signal_count: AtomicU8,
}

impl InterruptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an interrupt has been received
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and return what to do about it
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);

        match count {
            0 => SignalAction::StopAtBoundary,
            1 => SignalAction::ExitNow,
            _ => SignalAction::Ignore,
        }
    }

    /// Reset the state (for testing)
    pub fn reset(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
        self.signal_count.store(0, Ordering::SeqCst);
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: finish the current step, then stop
    StopAtBoundary,
    /// Second signal: exit without waiting
    ExitNow,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the process-wide handler and hands out the shared state
pub struct SignalHandler {
    state: Arc<InterruptState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(InterruptState::new()),
        }
    }

    pub fn state(&self) -> Arc<InterruptState> {
        Arc::clone(&self.state)
    }

    /// Install handlers for SIGINT and SIGTERM.
    ///
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::StopAtBoundary => {
                tracing::warn!("interrupt received, stopping after the current step");
            }
            SignalAction::ExitNow => {
                eprintln!("\nReceived second interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

//! Cooperative cancellation for long-running operations.
//!
//! A [`CancelToken`] is shared between whoever may ask an operation to stop
//! (GUI Stop button, Ctrl+C handler, the responder's stop watcher) and the
//! loop doing the work, which polls it between chunks.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::{STOP_TOKEN, read_frame};

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    armed: AtomicBool,
}

/// Shared stop flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation before starting a new operation.
    pub fn reset(&self) {
        self.state.cancelled.store(false, Ordering::SeqCst);
    }

    /// Mark a long-running operation as in progress until the guard drops.
    ///
    /// The terminal interrupt handler only cancels armed tokens; otherwise
    /// Ctrl+C exits the program.
    pub fn arm(&self) -> ArmGuard {
        self.reset();
        self.state.armed.store(true, Ordering::SeqCst);
        ArmGuard { token: self.clone() }
    }

    pub fn is_armed(&self) -> bool {
        self.state.armed.load(Ordering::SeqCst)
    }
}

/// Disarms the token on drop.
#[must_use = "the token is disarmed as soon as the guard is dropped"]
pub struct ArmGuard {
    token: CancelToken,
}

impl Drop for ArmGuard {
    fn drop(&mut self) {
        self.token.state.armed.store(false, Ordering::SeqCst);
    }
}

/// What the stop watcher saw on the command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The `"Stop"` sentinel arrived.
    Stopped,
    /// Some other frame arrived; treated as a stop request.
    Unexpected(String),
    /// The stream closed or failed.
    Closed,
}

/// Responder-side thread that reads exactly one frame from a clone of the
/// command stream and trips the token when it arrives.
pub struct StopWatcher {
    handle: JoinHandle<WatchOutcome>,
}

impl StopWatcher {
    pub fn spawn(stream: &TcpStream, token: CancelToken) -> Result<Self> {
        let mut reader = stream.try_clone()?;
        let handle = thread::Builder::new()
            .name("stop-watcher".to_string())
            .spawn(move || {
                let outcome = match read_frame(&mut reader) {
                    Ok(Some(payload)) if payload == STOP_TOKEN.as_bytes() => WatchOutcome::Stopped,
                    Ok(Some(payload)) => {
                        let text = String::from_utf8_lossy(&payload).into_owned();
                        warn!("Expected {STOP_TOKEN:?} during long operation, got {text:?}");
                        WatchOutcome::Unexpected(text)
                    }
                    Ok(None) => WatchOutcome::Closed,
                    Err(e) => {
                        debug!("Stop watcher read failed: {e}");
                        WatchOutcome::Closed
                    }
                };
                token.cancel();
                outcome
            })?;
        Ok(Self { handle })
    }

    /// Wait for the watcher to consume its frame.
    pub fn join(self) -> WatchOutcome {
        self.handle.join().unwrap_or(WatchOutcome::Closed)
    }
}

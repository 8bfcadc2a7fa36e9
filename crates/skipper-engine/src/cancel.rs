//! Process-wide cancellation: one shared token, tripped at most once by the
//! signal handler, propagated to the in-flight child's process group.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    pgid: Mutex<Option<i32>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Trips the token. The first call forwards SIGINT to the registered
    /// process group; later calls are inert.
    pub fn trigger(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(guard) = self.inner.pgid.lock() {
            if let Some(pgid) = *guard {
                signal_group(pgid);
            }
        }
    }

    /// Records the process group of the currently running child so a later
    /// trigger reaches the whole subtree, not just the direct child.
    pub(crate) fn register_pgid(&self, pgid: i32) {
        if let Ok(mut guard) = self.inner.pgid.lock() {
            *guard = Some(pgid);
        }
        // A signal may have arrived between spawn and registration.
        if self.is_cancelled() {
            signal_group(pgid);
        }
    }

    pub(crate) fn clear_pgid(&self) {
        if let Ok(mut guard) = self.inner.pgid.lock() {
            *guard = None;
        }
    }
}

/// Sends SIGINT to the negative process-group id so the engine CLI and
/// anything it launched receive it.
#[allow(unsafe_code)]
fn signal_group(pgid: i32) {
    // SAFETY: plain syscall, no pointer arguments.
    unsafe {
        libc::kill(-pgid, libc::SIGINT);
    }
}

/// Installs the SIGINT/SIGTERM handler. First signal trips the token and
/// lets the current operation surface the cancellation; a second signal
/// exits immediately.
pub fn install_signal_handler(token: &CancelToken) {
    let token = token.clone();
    let _ = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(1);
        }
        eprintln!("\ncommand interrupted");
        token.trigger();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn trigger_is_sticky() {
        let token = CancelToken::new();
        token.trigger();
        token.trigger();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.trigger();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn pgid_registration_round_trip() {
        let token = CancelToken::new();
        // Registering our own (still-running) pgid must not signal anything
        // while the token is clear.
        token.register_pgid(0);
        token.clear_pgid();
        assert!(!token.is_cancelled());
    }
}

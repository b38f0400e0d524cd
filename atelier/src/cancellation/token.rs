//! Cancellation token shared by a dispatcher worker and its stage.

use crate::errors::AtelierError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Advisory cancellation flag, polled by stages between steps.
///
/// Cancellation is idempotent; the first reason wins.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<CancelCallback>>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns true if this call set the flag.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let reason = reason.into();
        *self.reason.write() = Some(reason.clone());
        for callback in self.callbacks.read().iter() {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(&reason))) {
                warn!("Cancellation callback panicked: {:?}", e);
            }
        }
        true
    }

    /// Registers a callback run once on cancellation, or immediately if
    /// the token is already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if let Some(reason) = self.reason() {
            callback(&reason);
        } else {
            self.callbacks.write().push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Fails with `Cancelled` once cancellation was requested.
    pub fn check(&self) -> Result<(), AtelierError> {
        if self.is_cancelled() {
            let reason = self.reason().unwrap_or_else(|| "cancelled".to_string());
            return Err(AtelierError::cancelled(reason));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

//! Cooperative cancellation shared between a run's stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{FrameforgeError, FrameforgeResult};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

/// Flag checked by every stage at each suspension point. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.state.reason.lock() {
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.state.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.state.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> FrameforgeResult<()> {
        if self.is_cancelled() {
            Err(FrameforgeError::cancelled(
                self.reason()
                    .unwrap_or_else(|| "cancellation requested".to_string()),
            ))
        } else {
            Ok(())
        }
    }
}

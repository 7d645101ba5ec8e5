//! Exclusivity lock guarding the decision to change clock/format state
//!
//! Try-only: an opener that finds the device held fails with `Busy` instead
//! of waiting. Tokens release on drop, so an opener that bails out early
//! cannot leak the device.

use crate::domain::audio::{PcmError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct LockState {
    held: AtomicBool,
    generation: AtomicU64,
}

/// Per-device exclusivity gate; at most one outstanding token
#[derive(Debug, Clone, Default)]
pub struct ExclusivityLock {
    state: Arc<LockState>,
}

impl ExclusivityLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the device or fail immediately with `Busy`
    pub fn try_acquire(&self) -> Result<ExclusivityToken> {
        self.state
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PcmError::Busy)?;

        let generation = self.state.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "Exclusivity acquired");

        Ok(ExclusivityToken {
            state: Some(Arc::clone(&self.state)),
            generation,
        })
    }

    /// Give the device back; equivalent to dropping the token
    pub fn release(&self, token: ExclusivityToken) {
        if !token.belongs_to(self) {
            warn!(
                generation = token.generation,
                "Releasing a token issued by another device"
            );
        }
        drop(token);
    }

    pub fn is_held(&self) -> bool {
        self.state.held.load(Ordering::Acquire)
    }
}

/// Proof that the holder may mutate shared clock/format state
#[derive(Debug)]
pub struct ExclusivityToken {
    state: Option<Arc<LockState>>,
    generation: u64,
}

impl ExclusivityToken {
    /// Monotonic acquisition number, for diagnostics
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn belongs_to(&self, lock: &ExclusivityLock) -> bool {
        self.state
            .as_ref()
            .map(|state| Arc::ptr_eq(state, &lock.state))
            .unwrap_or(false)
    }
}

impl Drop for ExclusivityToken {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.held.store(false, Ordering::Release);
            debug!(generation = self.generation, "Exclusivity released");
        }
    }
}

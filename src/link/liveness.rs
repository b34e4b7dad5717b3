//! Liveness flag shared between a link and the task that services it.
//!
//! Every [`arm`](Liveness::arm) starts a new generation. A servicing task
//! that finishes only clears the flag for the generation it was handed, so
//! a run ending late cannot mark a newer connection dead.

use core::sync::atomic::{AtomicU32, Ordering};

const ALIVE: u32 = 1;

/// Generation counter in the upper bits, alive flag in bit 0.
pub struct Liveness(AtomicU32);

impl Liveness {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Mark a new link alive. Returns its generation.
    pub fn arm(&self) -> u32 {
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(((v >> 1).wrapping_add(1) << 1) | ALIVE)
            })
            .unwrap_or_else(|v| v);
        (prev >> 1).wrapping_add(1) & (u32::MAX >> 1)
    }

    /// Clear the flag whatever the generation.
    pub fn disarm(&self) {
        self.0.fetch_and(!ALIVE, Ordering::AcqRel);
    }

    /// Clear the flag only if `generation` is still the current one.
    /// Returns whether it was cleared.
    pub fn end(&self, generation: u32) -> bool {
        let live = (generation << 1) | ALIVE;
        self.0
            .compare_exchange(live, generation << 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::Acquire) & ALIVE != 0
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

// src/handoff.rs
//
// Capture hand-off between the DMA completion interrupt and the control loop.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::codec::MAX_TELEMETRY_INPUT_LEN;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;
const READING: u8 = 3;

/// One captured telemetry frame in flight from interrupt to control loop.
///
/// The interrupt `publish`es edge timestamps, the control loop `take`s them.
/// The buffer is only touched by whoever won the state transition out of
/// `EMPTY` (writer) or `READY` (reader), so a stale or half-written capture
/// is never observed.
pub struct CaptureSlot {
    state: AtomicU8,
    len: UnsafeCell<usize>,
    edges: UnsafeCell<[u32; MAX_TELEMETRY_INPUT_LEN]>,
}

// Access to `len` and `edges` is serialised by `state`.
unsafe impl Sync for CaptureSlot {}

impl CaptureSlot {
    pub const fn new() -> Self {
        CaptureSlot {
            state: AtomicU8::new(EMPTY),
            len: UnsafeCell::new(0),
            edges: UnsafeCell::new([0; MAX_TELEMETRY_INPUT_LEN]),
        }
    }

    /// Fill the slot and mark it ready.
    ///
    /// `fill` receives the buffer and returns how many edges it wrote. Returns
    /// `false` without calling `fill` if a previous capture has not been taken.
    pub fn publish(&self, fill: impl FnOnce(&mut [u32; MAX_TELEMETRY_INPUT_LEN]) -> usize) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        // Safety: WRITING is held exclusively until the store below.
        unsafe {
            let n = fill(&mut *self.edges.get());
            *self.len.get() = n.min(MAX_TELEMETRY_INPUT_LEN);
        }
        self.state.store(READY, Ordering::Release);
        true
    }

    /// Copy a ready capture into `out` and empty the slot.
    ///
    /// Returns the number of edges copied, or `None` if nothing is ready.
    pub fn take(&self, out: &mut [u32]) -> Option<usize> {
        if self
            .state
            .compare_exchange(READY, READING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        // Safety: READING is held exclusively until the store below.
        let n = unsafe {
            let len = (*self.len.get()).min(out.len());
            out[..len].copy_from_slice(&(&(*self.edges.get()))[..len]);
            len
        };
        self.state.store(EMPTY, Ordering::Release);
        Some(n)
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Drop a ready capture. A capture being written is left alone.
    pub fn clear(&self) {
        let _ = self
            .state
            .compare_exchange(READY, EMPTY, Ordering::AcqRel, Ordering::Relaxed);
    }
}

impl Default for CaptureSlot {
    fn default() -> Self {
        Self::new()
    }
}

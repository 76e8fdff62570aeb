//! Lock-free telemetry ring with per-slot sequence publication
//!
//! Producers claim a slot number with a single relaxed `fetch_add` on the
//! head counter, then invalidate, write, and publish the slot through its
//! sequence word. The head counter is monotonic in value space and never
//! wraps; slot indices are `claim & mask`. Consumers never block producers:
//! a slow consumer is lapped and the loss is accounted, not resisted.

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    entry::{Entry, Slot},
    error::{BtlmError, Result},
};

/// Memory footprint in bytes of a ring with `entry_count` slots, for
/// embedders budgeting against a fixed allocation.
pub fn ring_size(entry_count: u32) -> usize {
    std::mem::size_of::<Ring>() + entry_count as usize * std::mem::size_of::<Slot>()
}

/// Outcome of a committed-slot read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotRead {
    /// Entry copied out and verified
    Committed,
    /// The producer that claimed this slot has not published yet
    NotPublished,
    /// The slot was overwritten while it was being copied
    Overwritten,
}

/// Fixed-capacity slot array with a monotonically increasing head counter.
pub struct Ring {
    head: AtomicU64,
    capacity: u64,
    mask: u64,
    slots: Box<[Slot]>,
}

impl Ring {
    /// Create a ring with `entry_count` slots. `entry_count` must be a
    /// power of two.
    pub fn new(entry_count: u32) -> Result<Self> {
        if entry_count == 0 || !entry_count.is_power_of_two() {
            return Err(BtlmError::invalid_argument(
                "entry_count",
                "ring capacity must be a power of 2 and greater than 0",
            ));
        }

        let slots: Box<[Slot]> = (0..entry_count).map(|_| Slot::new()).collect();

        Ok(Self {
            head: AtomicU64::new(0),
            capacity: entry_count as u64,
            mask: entry_count as u64 - 1,
            slots,
        })
    }

    /// Number of entry slots.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Current head (next claim value), acquire-ordered so slot publishes
    /// made before the claim are visible.
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Claim value of the oldest slot that can still be committed, given a
    /// head observation.
    #[inline]
    pub(crate) fn oldest(&self, head: u64) -> u64 {
        head.saturating_sub(self.capacity)
    }

    /// Record one entry. Wait-free: a single relaxed `fetch_add` is the only
    /// synchronising instruction; the payload copy is bounded by the seq
    /// discipline, not by atomicity.
    ///
    /// `payload` longer than the slot capacity is truncated; the `log`
    /// front-ends guarantee it never is.
    #[inline]
    pub(crate) fn produce(&self, id: u16, timestamp: u64, payload: &[u8]) {
        let len = payload.len().min(crate::config::MAX_PAYLOAD);

        let slot_val = self.head.fetch_add(1, Ordering::Relaxed);
        let slot = &self.slots[(slot_val & self.mask) as usize];

        // Invalidate before touching the payload: a consumer observing
        // seq == 0 or seq != slot_val + 1 treats the slot as uncommitted.
        slot.invalidate();
        unsafe {
            let d = slot.data_ptr();
            (*d).timestamp = timestamp;
            (*d).id = id;
            (*d).payload_size = len as u16;
            ptr::copy_nonoverlapping(payload.as_ptr(), (*d).payload.as_mut_ptr(), len);
        }
        slot.publish(slot_val);
    }

    /// Two-phase committed read of the slot claimed by `slot_val`.
    ///
    /// On `Committed` the entry has been copied into `out` and re-verified
    /// against the sequence word; a mismatch after the copy means a producer
    /// overwrote the slot mid-read and the copy must be discarded.
    #[inline]
    pub(crate) fn read_committed(&self, slot_val: u64, out: &mut Entry) -> SlotRead {
        let slot = &self.slots[(slot_val & self.mask) as usize];

        let seq = slot.seq_acquire();
        if seq != slot_val + 1 {
            return SlotRead::NotPublished;
        }

        unsafe {
            *out = ptr::read(slot.data_ptr());
        }

        let seq2 = slot.seq_acquire();
        if seq2 != seq {
            return SlotRead::Overwritten;
        }

        SlotRead::Committed
    }
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

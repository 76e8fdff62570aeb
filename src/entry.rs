//! Ring slot layout and the drained entry copy
//!
//! Every slot has identical fixed size so the drain path is a single
//! predictable `memcpy`. With the default payload capacity a slot is exactly
//! 256 bytes, a clean cache-line multiple.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::MAX_PAYLOAD;

/// One telemetry record as copied out of the ring during a drain.
///
/// This is also the in-slot data layout (everything except the sequence
/// word), so a slot read is one contiguous copy.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Entry {
    /// Capture time, from the context's timestamp source
    pub timestamp: u64,
    /// Schema id of the payload
    pub id: u16,
    pub(crate) payload_size: u16,
    _pad: [u8; 4],
    pub(crate) payload: [u8; MAX_PAYLOAD],
}

impl Entry {
    pub(crate) const fn zeroed() -> Self {
        Self {
            timestamp: 0,
            id: 0,
            payload_size: 0,
            _pad: [0; 4],
            payload: [0; MAX_PAYLOAD],
        }
    }

    /// Payload bytes exactly as passed to `log`.
    pub fn payload(&self) -> &[u8] {
        let n = (self.payload_size as usize).min(MAX_PAYLOAD);
        &self.payload[..n]
    }

    /// Declared payload length in bytes.
    pub fn payload_size(&self) -> u16 {
        (self.payload_size as usize).min(MAX_PAYLOAD) as u16
    }

    /// Reinterpret the payload as a `#[repr(C)]` value.
    ///
    /// Returns `None` when the payload length does not match `T` exactly.
    pub fn payload_as<T: Copy>(&self) -> Option<T> {
        if self.payload_size() as usize != std::mem::size_of::<T>() {
            return None;
        }
        // Unaligned read: the payload area has no alignment guarantee.
        Some(unsafe { std::ptr::read_unaligned(self.payload.as_ptr() as *const T) })
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("timestamp", &self.timestamp)
            .field("id", &self.id)
            .field("payload_size", &self.payload_size())
            .finish()
    }
}

/// A slot in the ring: sequence word plus entry data.
///
/// Committed iff `seq == claim_value + 1` for the slot's most recent claim.
/// `seq == 0` marks a slot that is empty or mid-write.
#[repr(C)]
pub(crate) struct Slot {
    seq: AtomicU64,
    data: UnsafeCell<Entry>,
}

// Data races on `data` are bounded by the seq protocol: consumers copy the
// entry then re-check seq, discarding torn reads.
unsafe impl Sync for Slot {}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            data: UnsafeCell::new(Entry::zeroed()),
        }
    }

    #[inline]
    pub(crate) fn seq_acquire(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Mark the slot uncommitted before mutating its payload.
    #[inline]
    pub(crate) fn invalidate(&self) {
        self.seq.store(0, Ordering::Release);
    }

    /// Publish the slot for the given claim value.
    #[inline]
    pub(crate) fn publish(&self, slot_val: u64) {
        self.seq.store(slot_val + 1, Ordering::Release);
    }

    #[inline]
    pub(crate) fn data_ptr(&self) -> *mut Entry {
        self.data.get()
    }
}

// Slot layout invariants: header is 24 bytes, total a cache-line multiple.
const _: () = assert!(std::mem::size_of::<Entry>() == 16 + MAX_PAYLOAD);
const _: () = assert!(std::mem::size_of::<Slot>() == 24 + MAX_PAYLOAD);
const _: () = assert!(std::mem::size_of::<Slot>() % 64 == 0);

//! Per-consumer read state: cursor, filter, drop accounting
//!
//! Consumers live in a fixed-size table owned by the context. Every field is
//! interior-atomic so the table itself needs no lock: open/close claim and
//! release slots with a compare-exchange, and the drain paths mutate only
//! their own slot. One drain at a time per consumer id is the usage
//! contract; concurrent drains of the same id are memory-safe but will
//! interleave cursors arbitrarily.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::MAX_SCHEMA_ENTRIES;

/// Schema-id acceptance set for a consumer.
///
/// Stored as a dense flag array indexed by id, which covers the full
/// `MAX_SCHEMA_ENTRIES` range. (A 64-bit id bitmask would silently fail for
/// ids >= 64 if the entry limit were ever raised; the dense form does not
/// have that cliff.)
#[derive(Clone)]
pub struct Filter {
    accept: [bool; MAX_SCHEMA_ENTRIES],
    active: bool,
}

impl Filter {
    /// Accept every schema id.
    pub fn all() -> Self {
        Self {
            accept: [false; MAX_SCHEMA_ENTRIES],
            active: false,
        }
    }

    /// Accept only the listed schema ids. Ids outside the registrable range
    /// are ignored; an empty list accepts everything.
    pub fn only(ids: &[u16]) -> Self {
        let mut accept = [false; MAX_SCHEMA_ENTRIES];
        for &id in ids {
            if (id as usize) < MAX_SCHEMA_ENTRIES {
                accept[id as usize] = true;
            }
        }
        Self {
            accept,
            active: !ids.is_empty(),
        }
    }

    /// Whether entries with this schema id pass the filter.
    pub fn accepts(&self, id: u16) -> bool {
        if !self.active {
            return true;
        }
        (id as usize) < MAX_SCHEMA_ENTRIES && self.accept[id as usize]
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

/// One slot of the consumer table.
pub(crate) struct ConsumerState {
    active: AtomicBool,
    /// Absolute read position in claim-value space
    cursor: AtomicU64,
    /// Cumulative entries lost to overwrite since open
    dropped: AtomicU64,
    /// Portion of `dropped` already reflected in emitted packets
    dropped_reported: AtomicU64,
    filter_active: AtomicBool,
    filter: [AtomicBool; MAX_SCHEMA_ENTRIES],
}

impl ConsumerState {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            cursor: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            dropped_reported: AtomicU64::new(0),
            filter_active: AtomicBool::new(false),
            filter: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    /// Claim an inactive slot. On success the slot is initialised at
    /// `cursor` with the given filter and zeroed drop counters.
    pub(crate) fn try_claim(&self, cursor: u64, filter: &Filter) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.cursor.store(cursor, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.dropped_reported.store(0, Ordering::Relaxed);
        self.store_filter(filter);
        true
    }

    pub(crate) fn release(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn store_filter(&self, filter: &Filter) {
        for (flag, &accept) in self.filter.iter().zip(filter.accept.iter()) {
            flag.store(accept, Ordering::Relaxed);
        }
        self.filter_active.store(filter.active, Ordering::Relaxed);
    }

    pub(crate) fn accepts(&self, id: u16) -> bool {
        if !self.filter_active.load(Ordering::Relaxed) {
            return true;
        }
        (id as usize) < MAX_SCHEMA_ENTRIES
            && self.filter[id as usize].load(Ordering::Relaxed)
    }

    pub(crate) fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    pub(crate) fn set_cursor(&self, cursor: u64) {
        self.cursor.store(cursor, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped_reported(&self) -> u64 {
        self.dropped_reported.load(Ordering::Relaxed)
    }

    pub(crate) fn advance_reported(&self, n: u64) {
        self.dropped_reported.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accept_all() {
        let f = Filter::all();
        assert!(f.accepts(0));
        assert!(f.accepts(63));
        assert!(f.accepts(u16::MAX));

        // Empty id list behaves as accept-all
        let f = Filter::only(&[]);
        assert!(f.accepts(17));
    }

    #[test]
    fn test_filter_dense_ids() {
        let f = Filter::only(&[1, 63]);
        assert!(f.accepts(1));
        assert!(f.accepts(63));
        assert!(!f.accepts(0));
        assert!(!f.accepts(2));
        assert!(!f.accepts(64));
    }

    #[test]
    fn test_filter_out_of_range_ignored() {
        let f = Filter::only(&[500]);
        // Filter is active but accepts nothing representable
        assert!(!f.accepts(0));
        assert!(!f.accepts(500));
    }

    #[test]
    fn test_claim_release_cycle() {
        let c = ConsumerState::new();
        assert!(!c.is_active());

        assert!(c.try_claim(42, &Filter::all()));
        assert!(c.is_active());
        assert_eq!(c.cursor(), 42);
        assert_eq!(c.dropped(), 0);

        // Second claim fails until released
        assert!(!c.try_claim(0, &Filter::all()));
        c.release();
        assert!(c.try_claim(0, &Filter::only(&[3])));
        assert!(c.accepts(3));
        assert!(!c.accepts(4));
    }

    #[test]
    fn test_reclaim_resets_counters() {
        let c = ConsumerState::new();
        assert!(c.try_claim(0, &Filter::all()));
        c.add_dropped(9);
        c.advance_reported(4);
        c.release();

        assert!(c.try_claim(7, &Filter::all()));
        assert_eq!(c.dropped(), 0);
        assert_eq!(c.dropped_reported(), 0);
        assert_eq!(c.cursor(), 7);
    }
}

//! Context: ownership root for the ring, registry, and consumer table
//!
//! A context is built once at startup (registering schemas needs `&mut`),
//! then shared by reference or `Arc` between producer and consumer threads.
//! Everything past construction works through `&self`.

use std::mem::size_of;
use std::slice;

use crate::{
    clock::{monotonic_ns, TimestampFn},
    config::{MAX_CLIENTS, MAX_PAYLOAD},
    consumer::{ConsumerState, Filter},
    error::{BtlmError, Result},
    ring::Ring,
    schema::{SchemaEntry, SchemaRegistry},
};

/// Endianness tag recorded in the schema header: 0 = little, 1 = big.
pub(crate) const ENDIAN_TAG: u8 = if cfg!(target_endian = "little") { 0 } else { 1 };

/// Ownership root: ring, schema registry, consumer table, timestamp source.
pub struct Context {
    ring: Ring,
    consumers: [ConsumerState; MAX_CLIENTS],
    registry: SchemaRegistry,
    endianness: u8,
    timestamp_fn: TimestampFn,
}

impl Context {
    /// Create a context with a ring of `entry_count` slots (power of two).
    pub fn new(entry_count: u32) -> Result<Self> {
        Ok(Self {
            ring: Ring::new(entry_count)?,
            consumers: std::array::from_fn(|_| ConsumerState::new()),
            registry: SchemaRegistry::new(),
            endianness: ENDIAN_TAG,
            timestamp_fn: monotonic_ns,
        })
    }

    /// Replace the timestamp source. Affects entries logged afterwards.
    pub fn set_timestamp_fn(&mut self, f: TimestampFn) {
        self.timestamp_fn = f;
    }

    /// Register a schema descriptor. Must be called before logging under its
    /// id if decoders are to interpret the payload; re-registering an id
    /// replaces the descriptor.
    pub fn register(&mut self, entry: &'static SchemaEntry) -> Result<()> {
        self.registry.register(entry)
    }

    /// Record one fixed-layout value. Infallible and wait-free; the payload
    /// size is checked at compile time.
    ///
    /// The entry is either observed by later drains as committed, or
    /// superseded by a later producer before any consumer copied it. No
    /// failure is reported either way.
    #[inline]
    pub fn log<T: Copy>(&self, id: u16, value: &T) {
        const {
            assert!(
                size_of::<T>() <= MAX_PAYLOAD,
                "payload exceeds the fixed entry capacity"
            );
        }
        let bytes =
            unsafe { slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) };
        self.ring.produce(id, (self.timestamp_fn)(), bytes);
    }

    /// Record a raw byte payload whose length is only known at run time.
    /// Oversize payloads are truncated to the slot capacity (debug builds
    /// assert instead).
    #[inline]
    pub fn log_bytes(&self, id: u16, payload: &[u8]) {
        debug_assert!(payload.len() <= MAX_PAYLOAD, "payload exceeds entry capacity");
        self.ring.produce(id, (self.timestamp_fn)(), payload);
    }

    /// Open a consumer at the current head (no historical playback).
    /// Returns the consumer id, or [`BtlmError::NoFreeConsumerSlot`] when
    /// the table is full.
    pub fn consumer_open(&self, filter: Filter) -> Result<usize> {
        let cursor = self.ring.head();
        for (id, slot) in self.consumers.iter().enumerate() {
            if slot.try_claim(cursor, &filter) {
                return Ok(id);
            }
        }
        Err(BtlmError::NoFreeConsumerSlot)
    }

    /// Close a consumer, freeing its table slot. Closing an unknown or
    /// already-closed id is a no-op.
    pub fn consumer_close(&self, id: usize) {
        if let Some(slot) = self.consumers.get(id) {
            slot.release();
        }
    }

    /// Replace a consumer's filter. Takes effect on the next drain; must not
    /// race a concurrent drain of the same id if the boundary between old
    /// and new filter matters.
    pub fn consumer_set_filter(&self, id: usize, filter: Filter) {
        if let Some(slot) = self.consumers.get(id) {
            if slot.is_active() {
                slot.store_filter(&filter);
            }
        }
    }

    /// Entries currently available to a consumer, plus the number that will
    /// be counted as dropped at the next drain because the ring already
    /// overwrote them. Pure read: mutates neither cursor nor drop counters.
    pub fn consumer_available(&self, id: usize) -> Result<(u64, u64)> {
        let c = self.consumer(id)?;
        let head = self.ring.head();
        let cursor = c.cursor();

        if head <= cursor {
            return Ok((0, 0));
        }

        let oldest = self.ring.oldest(head);
        if cursor < oldest {
            Ok((head - oldest, oldest - cursor))
        } else {
            Ok((head - cursor, 0))
        }
    }

    /// Cumulative entries lost to overwrite for this consumer since open.
    pub fn consumer_dropped(&self, id: usize) -> Result<u64> {
        Ok(self.consumer(id)?.dropped())
    }

    pub(crate) fn consumer(&self, id: usize) -> Result<&ConsumerState> {
        self.consumers
            .get(id)
            .filter(|c| c.is_active())
            .ok_or(BtlmError::InvalidConsumer { id })
    }

    pub(crate) fn ring(&self) -> &Ring {
        &self.ring
    }

    pub(crate) fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub(crate) fn endianness(&self) -> u8 {
        self.endianness
    }
}

//! Drain paths: callback walk and packed-batch assembly
//!
//! Both walks share the same protocol: jump the cursor over anything the
//! producers have already lapped (accounting the loss), then advance slot by
//! slot while each slot's sequence word matches `cursor + 1`. A sequence
//! change observed after the local copy means the slot was overwritten
//! mid-read; the copy is discarded and counted as a drop.

use crate::{
    consumer::ConsumerState,
    context::Context,
    entry::Entry,
    error::{BtlmError, Result},
    ring::{Ring, SlotRead},
    wire::{EntryHeader, PacketHeader},
};

/// Accumulate lap loss and jump the cursor to the oldest live entry.
/// Returns the possibly-adjusted cursor.
fn catch_up(ring: &Ring, c: &ConsumerState, head: u64) -> u64 {
    let cursor = c.cursor();
    let oldest = ring.oldest(head);
    if cursor < oldest {
        c.add_dropped(oldest - cursor);
        c.set_cursor(oldest);
        oldest
    } else {
        cursor
    }
}

impl Context {
    /// Walk committed entries from the consumer's cursor toward the head,
    /// invoking `emit` for each entry that passes the filter. `emit`
    /// returning `false` stops the walk early; this is a successful stop,
    /// not an error.
    ///
    /// Returns the number of entries handed to `emit`, or
    /// [`BtlmError::InvalidConsumer`] if the id is unknown or inactive.
    pub fn drain<F>(&self, id: usize, mut emit: F) -> Result<usize>
    where
        F: FnMut(&Entry) -> bool,
    {
        let c = self.consumer(id)?;
        let ring = self.ring();
        let head = ring.head();

        let mut cursor = catch_up(ring, c, head);
        let mut emitted = 0usize;
        let mut local = Entry::zeroed();

        while cursor < head {
            match ring.read_committed(cursor, &mut local) {
                // Producer claimed but has not published; later slots cannot
                // be older, so stop here.
                SlotRead::NotPublished => break,
                SlotRead::Overwritten => {
                    c.add_dropped(1);
                    cursor += 1;
                    continue;
                }
                SlotRead::Committed => {}
            }

            cursor += 1;

            if !c.accepts(local.id) {
                continue;
            }
            if !emit(&local) {
                break;
            }
            emitted += 1;
        }

        c.set_cursor(cursor);
        Ok(emitted)
    }

    /// Drain into a packed batch:
    /// `[PacketHeader | EntryHeader x N | payload area]`.
    ///
    /// The entry table is fixed-stride so receivers can scan ids without
    /// touching payload bytes. Layout is built in a single pass: the payload
    /// area initially sits after a worst-case table, and is moved down once
    /// the true entry count is known.
    ///
    /// Returns the total packet size in bytes, `Ok(0)` when there is nothing
    /// to send, [`BtlmError::BufferTooSmall`] when `buf` cannot hold even a
    /// packet header, or [`BtlmError::InvalidConsumer`].
    pub fn drain_packed(&self, id: usize, buf: &mut [u8]) -> Result<usize> {
        let c = self.consumer(id)?;
        let ring = self.ring();
        let head = ring.head();

        let mut cursor = catch_up(ring, c, head);
        if cursor >= head {
            return Ok(0);
        }

        if buf.len() < PacketHeader::SIZE {
            return Err(BtlmError::buffer_too_small(PacketHeader::SIZE, buf.len()));
        }

        // Upper bound on the entry table: what is available, capped by what
        // the buffer can physically hold in entry headers.
        let available = (head - cursor).min(ring.capacity()) as usize;
        let space_after_hdr = buf.len() - PacketHeader::SIZE;
        let max_entries = (space_after_hdr / EntryHeader::SIZE).min(available);
        if max_entries == 0 {
            return Ok(0);
        }

        // Payload area starts after the worst-case table; moved down later.
        let payload_base = PacketHeader::SIZE + max_entries * EntryHeader::SIZE;
        let payload_capacity = buf.len() - payload_base;

        let mut entry_count = 0usize;
        let mut payload_offset = 0usize;
        let mut local = Entry::zeroed();

        while cursor < head {
            match ring.read_committed(cursor, &mut local) {
                SlotRead::NotPublished => break,
                SlotRead::Overwritten => {
                    c.add_dropped(1);
                    cursor += 1;
                    continue;
                }
                SlotRead::Committed => {}
            }

            if !c.accepts(local.id) {
                cursor += 1;
                continue;
            }

            let psize = local.payload_size() as usize;
            // Batch full: leave the entry for the next drain.
            if payload_offset + psize > payload_capacity {
                break;
            }
            if entry_count == max_entries {
                break;
            }

            cursor += 1;

            let eh = EntryHeader {
                id: local.id,
                payload_size: psize as u16,
                payload_offset: payload_offset as u32,
                timestamp: local.timestamp,
            };
            let table_off = PacketHeader::SIZE + entry_count * EntryHeader::SIZE;
            buf[table_off..table_off + EntryHeader::SIZE].copy_from_slice(eh.as_bytes());

            let dst = payload_base + payload_offset;
            buf[dst..dst + psize].copy_from_slice(local.payload());
            payload_offset += psize;
            entry_count += 1;
        }

        c.set_cursor(cursor);

        if entry_count == 0 {
            return Ok(0);
        }

        // Close the gap between the actual table and the payload area.
        let actual_payload_start = PacketHeader::SIZE + entry_count * EntryHeader::SIZE;
        if actual_payload_start != payload_base {
            buf.copy_within(payload_base..payload_base + payload_offset, actual_payload_start);
        }

        // The dropped field carries the delta since the previous packet, so
        // receivers can sum packets to reconstruct total loss.
        let delta = c.dropped() - c.dropped_reported();
        let pkt_dropped = delta.min(u32::MAX as u64) as u32;
        c.advance_reported(pkt_dropped as u64);

        let hdr = PacketHeader {
            entry_count: entry_count as u16,
            flags: 0,
            payload_size: payload_offset as u32,
            dropped: pkt_dropped,
            reserved: 0,
        };
        buf[..PacketHeader::SIZE].copy_from_slice(hdr.as_bytes());

        Ok(actual_payload_start + payload_offset)
    }
}

#[cfg(test)]
mod tests {
    use crate::{config::MAX_PAYLOAD, consumer::Filter, context::Context};

    #[test]
    fn test_drain_inactive_consumer() {
        let ctx = Context::new(16).unwrap();
        assert!(ctx.drain(0, |_| true).is_err());

        let id = ctx.consumer_open(Filter::all()).unwrap();
        ctx.consumer_close(id);
        assert!(ctx.drain(id, |_| true).is_err());
    }

    #[test]
    fn test_drain_early_stop_preserves_rest() {
        let ctx = Context::new(16).unwrap();
        let id = ctx.consumer_open(Filter::all()).unwrap();

        for i in 0..5u32 {
            ctx.log(0, &i);
        }

        // Stop after two entries
        let mut seen = Vec::new();
        let n = ctx
            .drain(id, |e| {
                seen.push(e.payload_as::<u32>().unwrap());
                seen.len() < 2
            })
            .unwrap();
        // The entry the callback rejected was consumed but not counted
        assert_eq!(n, 1);
        assert_eq!(seen, vec![0, 1]);

        let mut rest = Vec::new();
        ctx.drain(id, |e| {
            rest.push(e.payload_as::<u32>().unwrap());
            true
        })
        .unwrap();
        assert_eq!(rest, vec![2, 3, 4]);
    }

    #[test]
    fn test_drain_packed_rejects_tiny_buffer() {
        let ctx = Context::new(16).unwrap();
        let id = ctx.consumer_open(Filter::all()).unwrap();
        ctx.log(0, &1u32);

        let mut buf = [0u8; 8];
        assert!(ctx.drain_packed(id, &mut buf).is_err());

        // Nothing was consumed by the failed call
        assert_eq!(ctx.consumer_available(id).unwrap().0, 1);
    }

    #[test]
    fn test_drain_packed_header_only_buffer() {
        let ctx = Context::new(16).unwrap();
        let id = ctx.consumer_open(Filter::all()).unwrap();
        ctx.log(0, &1u32);

        // Room for the header but not a single table entry: empty result,
        // nothing consumed.
        let mut buf = [0u8; 16];
        assert_eq!(ctx.drain_packed(id, &mut buf).unwrap(), 0);
        assert_eq!(ctx.consumer_available(id).unwrap().0, 1);
    }

    #[test]
    fn test_drain_packed_empty_ring_small_buffer() {
        let ctx = Context::new(16).unwrap();
        let id = ctx.consumer_open(Filter::all()).unwrap();

        // Nothing to drain wins over the buffer check
        let mut buf = [0u8; 4];
        assert_eq!(ctx.drain_packed(id, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_drain_packed_short_payload_area_preserves_rest() {
        let ctx = Context::new(16).unwrap();
        let id = ctx.consumer_open(Filter::all()).unwrap();

        for _ in 0..4 {
            ctx.log_bytes(0, &[0xEE; MAX_PAYLOAD]);
        }

        // Table could hold 4 entries but payload area fits only one payload.
        let buf_size = 16 + 4 * 16 + MAX_PAYLOAD + 8;
        let mut buf = vec![0u8; buf_size];
        let n = ctx.drain_packed(id, &mut buf).unwrap();
        assert_eq!(n, 16 + 16 + MAX_PAYLOAD);

        // Remaining three entries survive for the next drains
        let mut big = vec![0u8; 4096];
        let n2 = ctx.drain_packed(id, &mut big).unwrap();
        let hdr = crate::wire::PacketHeader::read_from(&big[..n2]).unwrap();
        assert_eq!({ hdr.entry_count }, 3);
    }
}

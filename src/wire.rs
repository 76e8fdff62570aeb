//! Packed wire structures
//!
//! Every struct here defines on-wire / on-disk layout with a fixed stride so
//! decoders can index tables without parsing descriptors. Multi-byte
//! integers are stored in the producer's native byte order; the schema
//! header's endianness byte lets a decoder convert once.

use crate::{
    config::{
        BITFIELD_MAX_BITS, BIT_NAME_MAX, DESC_MAX, ENUM_LABEL_MAX, ENUM_MAX_VALUES, MAX_FIELDS,
        NAME_MAX,
    },
    error::{BtlmError, Result},
};

/// Footer magic of the `.btlm` file index ("BTLI").
pub const INDEX_MAGIC: u32 = 0x494C5442;

/// Copy `s` into a fixed-width, pre-zeroed name field, always leaving a
/// terminating zero byte.
pub(crate) fn write_name(dst: &mut [u8], s: &str) {
    let n = s.len().min(dst.len().saturating_sub(1));
    dst[..n].copy_from_slice(&s.as_bytes()[..n]);
}

/// Decode a fixed-width name field back to a string, stopping at the first
/// zero byte.
pub(crate) fn read_name(src: &[u8]) -> &str {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    std::str::from_utf8(&src[..end]).unwrap_or("")
}

macro_rules! wire_bytes {
    ($ty:ty) => {
        impl $ty {
            pub const SIZE: usize = std::mem::size_of::<$ty>();

            /// Raw wire bytes of this record.
            pub fn as_bytes(&self) -> &[u8] {
                unsafe {
                    std::slice::from_raw_parts(self as *const $ty as *const u8, Self::SIZE)
                }
            }

            /// Read a record from the front of `buf`, if it is long enough.
            pub fn read_from(buf: &[u8]) -> Option<Self> {
                if buf.len() < Self::SIZE {
                    return None;
                }
                Some(unsafe { std::ptr::read_unaligned(buf.as_ptr() as *const $ty) })
            }
        }
    };
}

/// Leading record of the schema blob.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct SchemaHeader {
    /// 0 = little-endian producer, 1 = big-endian
    pub endianness: u8,
    pub entry_count: u16,
}
wire_bytes!(SchemaHeader);

/// One field of a schema entry on the wire.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct FieldWire {
    pub name: [u8; NAME_MAX],
    pub offset: u16,
    pub size: u16,
    pub ty: u8,
    pub count: u8,
}
wire_bytes!(FieldWire);

impl FieldWire {
    pub(crate) const fn zeroed() -> Self {
        Self {
            name: [0; NAME_MAX],
            offset: 0,
            size: 0,
            ty: 0,
            count: 0,
        }
    }

    pub fn name_str(&self) -> &str {
        read_name(&self.name)
    }
}

/// One schema entry on the wire. Unused field slots are zero-filled.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct SchemaWire {
    pub id: u16,
    pub payload_size: u16,
    pub field_count: u16,
    pub name: [u8; NAME_MAX],
    pub description: [u8; DESC_MAX],
    pub fields: [FieldWire; MAX_FIELDS],
}
wire_bytes!(SchemaWire);

impl SchemaWire {
    pub(crate) const fn zeroed() -> Self {
        Self {
            id: 0,
            payload_size: 0,
            field_count: 0,
            name: [0; NAME_MAX],
            description: [0; DESC_MAX],
            fields: [FieldWire::zeroed(); MAX_FIELDS],
        }
    }

    pub fn name_str(&self) -> &str {
        read_name(&self.name)
    }

    pub fn description_str(&self) -> &str {
        read_name(&self.description)
    }
}

/// Enum label metadata, appended after the schema entries.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct EnumWire {
    pub schema_id: u16,
    pub field_index: u16,
    pub label_count: u8,
    pub labels: [[u8; ENUM_LABEL_MAX]; ENUM_MAX_VALUES],
}
wire_bytes!(EnumWire);

impl EnumWire {
    pub(crate) const fn zeroed() -> Self {
        Self {
            schema_id: 0,
            field_index: 0,
            label_count: 0,
            labels: [[0; ENUM_LABEL_MAX]; ENUM_MAX_VALUES],
        }
    }

    pub fn label(&self, i: usize) -> Option<&str> {
        if i < self.label_count as usize {
            Some(read_name(&self.labels[i]))
        } else {
            None
        }
    }
}

/// Bitfield layout metadata, appended after the enum section.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BitfieldWire {
    pub schema_id: u16,
    pub field_index: u16,
    pub bit_count: u8,
    pub names: [[u8; BIT_NAME_MAX]; BITFIELD_MAX_BITS],
    pub starts: [u8; BITFIELD_MAX_BITS],
    pub widths: [u8; BITFIELD_MAX_BITS],
}
wire_bytes!(BitfieldWire);

impl BitfieldWire {
    pub(crate) const fn zeroed() -> Self {
        Self {
            schema_id: 0,
            field_index: 0,
            bit_count: 0,
            names: [[0; BIT_NAME_MAX]; BITFIELD_MAX_BITS],
            starts: [0; BITFIELD_MAX_BITS],
            widths: [0; BITFIELD_MAX_BITS],
        }
    }
}

/// Leading record of a packed batch.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub entry_count: u16,
    /// Reserved, always 0
    pub flags: u16,
    /// Total payload area bytes; equals the sum of the entry table's sizes
    pub payload_size: u32,
    /// Entries dropped since the previous packet (delta, saturating)
    pub dropped: u32,
    pub reserved: u32,
}
wire_bytes!(PacketHeader);

/// Fixed-stride entry table record inside a packed batch.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct EntryHeader {
    pub id: u16,
    pub payload_size: u16,
    /// Offset into the payload area
    pub payload_offset: u32,
    pub timestamp: u64,
}
wire_bytes!(EntryHeader);

/// One record of the `.btlm` footer index.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// File offset of the packet
    pub offset: u64,
    pub ts_min: u64,
    pub ts_max: u64,
    pub entry_count: u32,
}
wire_bytes!(IndexEntry);

/// Trailing record of a `.btlm` file.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct IndexFooter {
    /// File offset of the first index entry
    pub index_offset: u64,
    pub index_count: u32,
    pub magic: u32,
}
wire_bytes!(IndexFooter);

// Wire strides are part of the format; decoders index tables with them.
const _: () = assert!(SchemaHeader::SIZE == 3);
const _: () = assert!(FieldWire::SIZE == 70);
const _: () = assert!(SchemaWire::SIZE == 1318);
const _: () = assert!(EnumWire::SIZE == 2053);
const _: () = assert!(BitfieldWire::SIZE == 549);
const _: () = assert!(PacketHeader::SIZE == 16);
const _: () = assert!(EntryHeader::SIZE == 16);
const _: () = assert!(IndexEntry::SIZE == 28);
const _: () = assert!(IndexFooter::SIZE == 16);

/// Zero-copy view over one packed batch.
///
/// Validates framing once at construction; entry and payload accessors are
/// then bounds-checked slices into the original buffer.
pub struct PacketView<'a> {
    header: PacketHeader,
    buf: &'a [u8],
}

impl<'a> PacketView<'a> {
    /// Parse the packet at the front of `buf`. Trailing bytes beyond the
    /// framed size are ignored.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let header = PacketHeader::read_from(buf)
            .ok_or_else(|| BtlmError::invalid_argument("packet", "shorter than a header"))?;

        let total = PacketHeader::SIZE
            + header.entry_count as usize * EntryHeader::SIZE
            + header.payload_size as usize;
        if buf.len() < total {
            return Err(BtlmError::invalid_argument("packet", "truncated"));
        }

        Ok(Self {
            header,
            buf: &buf[..total],
        })
    }

    pub fn header(&self) -> PacketHeader {
        self.header
    }

    /// Total framed size in bytes.
    pub fn total_size(&self) -> usize {
        self.buf.len()
    }

    pub fn entry_count(&self) -> usize {
        self.header.entry_count as usize
    }

    pub fn entry(&self, i: usize) -> Option<EntryHeader> {
        if i >= self.entry_count() {
            return None;
        }
        EntryHeader::read_from(&self.buf[PacketHeader::SIZE + i * EntryHeader::SIZE..])
    }

    /// Payload bytes of entry `i`.
    pub fn payload(&self, i: usize) -> Option<&'a [u8]> {
        let eh = self.entry(i)?;
        let area_start = PacketHeader::SIZE + self.entry_count() * EntryHeader::SIZE;
        let start = area_start + eh.payload_offset as usize;
        let end = start + eh.payload_size as usize;
        self.buf.get(start..end)
    }

    /// Iterate `(entry_header, payload)` pairs in table order.
    pub fn entries(&self) -> impl Iterator<Item = (EntryHeader, &'a [u8])> + '_ {
        (0..self.entry_count()).filter_map(move |i| Some((self.entry(i)?, self.payload(i)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        let mut buf = [0u8; 8];
        write_name(&mut buf, "short");
        assert_eq!(read_name(&buf), "short");

        // Truncation keeps the terminator
        let mut buf = [0u8; 4];
        write_name(&mut buf, "overflowing");
        assert_eq!(&buf, b"ove\0");
        assert_eq!(read_name(&buf), "ove");
    }

    #[test]
    fn test_header_byte_roundtrip() {
        let hdr = PacketHeader {
            entry_count: 3,
            flags: 0,
            payload_size: 24,
            dropped: 7,
            reserved: 0,
        };
        let parsed = PacketHeader::read_from(hdr.as_bytes()).unwrap();
        assert_eq!({ parsed.entry_count }, 3);
        assert_eq!({ parsed.payload_size }, 24);
        assert_eq!({ parsed.dropped }, 7);
    }

    #[test]
    fn test_packet_view_framing() {
        // Hand-built packet: 2 entries of 4 bytes each
        let mut pkt = Vec::new();
        let hdr = PacketHeader {
            entry_count: 2,
            flags: 0,
            payload_size: 8,
            dropped: 0,
            reserved: 0,
        };
        pkt.extend_from_slice(hdr.as_bytes());
        for (i, ts) in [(0u32, 100u64), (4, 101)] {
            let eh = EntryHeader {
                id: 9,
                payload_size: 4,
                payload_offset: i,
                timestamp: ts,
            };
            pkt.extend_from_slice(eh.as_bytes());
        }
        pkt.extend_from_slice(&11u32.to_ne_bytes());
        pkt.extend_from_slice(&22u32.to_ne_bytes());

        let view = PacketView::parse(&pkt).unwrap();
        assert_eq!(view.entry_count(), 2);
        assert_eq!(view.total_size(), 56);
        assert_eq!(view.payload(0).unwrap(), &11u32.to_ne_bytes());
        assert_eq!(view.payload(1).unwrap(), &22u32.to_ne_bytes());
        assert_eq!(view.entries().count(), 2);

        // Truncated buffer is rejected
        assert!(PacketView::parse(&pkt[..pkt.len() - 1]).is_err());
        assert!(PacketView::parse(&pkt[..4]).is_err());
    }
}

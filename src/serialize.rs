//! Schema blob serialisation, buffered and streaming
//!
//! Both forms emit the identical byte sequence:
//! `[SchemaHeader | SchemaWire x E | u16 enum_count | EnumWire x En |
//! u16 bitfield_count | BitfieldWire x Bn]`. The buffered form needs the
//! whole blob to fit in one caller buffer; the streaming form hands out one
//! fixed-size record at a time and never allocates, so it can run under
//! tight stack budgets and write straight to a socket.

use crate::{
    config::{BITFIELD_MAX_BITS, ENUM_MAX_VALUES, MAX_FIELDS},
    context::Context,
    error::{BtlmError, Result},
    schema::{FieldType, SchemaEntry, SchemaRegistry},
    wire::{write_name, BitfieldWire, EnumWire, FieldWire, SchemaHeader, SchemaWire},
};

/// Registered entry / enum-field / bitfield-field counts, in blob order.
fn section_counts(registry: &SchemaRegistry) -> (usize, usize, usize) {
    let mut entries = 0;
    let mut enums = 0;
    let mut bitfields = 0;
    for e in registry.iter() {
        entries += 1;
        for f in e.fields.iter().take(MAX_FIELDS) {
            if f.ty == FieldType::Enum && f.enum_def.is_some() {
                enums += 1;
            }
            if f.ty == FieldType::Bitfield && f.bitfield_def.is_some() {
                bitfields += 1;
            }
        }
    }
    (entries, enums, bitfields)
}

fn build_schema_wire(e: &SchemaEntry) -> SchemaWire {
    let mut w = SchemaWire::zeroed();
    w.id = e.id;
    w.payload_size = e.payload_size;
    w.field_count = e.fields.len() as u16;
    write_name(&mut w.name, e.name);
    write_name(&mut w.description, e.description);

    for (f, fw) in e.fields.iter().take(MAX_FIELDS).zip(w.fields.iter_mut()) {
        let mut out = FieldWire::zeroed();
        write_name(&mut out.name, f.name);
        out.offset = f.offset;
        out.size = f.size;
        out.ty = f.ty as u8;
        out.count = f.count;
        *fw = out;
    }
    w
}

fn build_enum_wire(e: &SchemaEntry, field_index: usize) -> EnumWire {
    let mut w = EnumWire::zeroed();
    w.schema_id = e.id;
    w.field_index = field_index as u16;

    let def = e.fields[field_index].enum_def.expect("enum field");
    let lc = def.labels.len().min(ENUM_MAX_VALUES);
    w.label_count = lc as u8;
    for (label, slot) in def.labels[..lc].iter().zip(w.labels.iter_mut()) {
        write_name(slot, label);
    }
    w
}

fn build_bitfield_wire(e: &SchemaEntry, field_index: usize) -> BitfieldWire {
    let mut w = BitfieldWire::zeroed();
    w.schema_id = e.id;
    w.field_index = field_index as u16;

    let def = e.fields[field_index].bitfield_def.expect("bitfield field");
    let bc = def.bits.len().min(BITFIELD_MAX_BITS);
    w.bit_count = bc as u8;
    for (i, bit) in def.bits[..bc].iter().enumerate() {
        write_name(&mut w.names[i], bit.name);
        w.starts[i] = bit.start;
        w.widths[i] = bit.width;
    }
    w
}

/// Enum fields of `e` in field order, truncated to the serialised field set.
fn enum_fields(e: &'static SchemaEntry) -> impl Iterator<Item = usize> {
    e.fields
        .iter()
        .take(MAX_FIELDS)
        .enumerate()
        .filter(|(_, f)| f.ty == FieldType::Enum && f.enum_def.is_some())
        .map(|(i, _)| i)
}

fn bitfield_fields(e: &'static SchemaEntry) -> impl Iterator<Item = usize> {
    e.fields
        .iter()
        .take(MAX_FIELDS)
        .enumerate()
        .filter(|(_, f)| f.ty == FieldType::Bitfield && f.bitfield_def.is_some())
        .map(|(i, _)| i)
}

impl Context {
    /// Serialise the schema blob into `buf`, or report the exact required
    /// size when `buf` is `None` (size-query mode).
    ///
    /// The output region is zero-filled before writing so padding bytes are
    /// deterministic; repeated calls produce identical bytes.
    pub fn schema_serialize(&self, buf: Option<&mut [u8]>) -> Result<usize> {
        let registry = self.registry();
        let (entries, enums, bitfields) = section_counts(registry);

        let needed = SchemaHeader::SIZE
            + entries * SchemaWire::SIZE
            + 2
            + enums * EnumWire::SIZE
            + 2
            + bitfields * BitfieldWire::SIZE;

        let Some(buf) = buf else {
            return Ok(needed);
        };
        if buf.len() < needed {
            return Err(BtlmError::buffer_too_small(needed, buf.len()));
        }

        buf[..needed].fill(0);
        let mut off = 0usize;

        let hdr = SchemaHeader {
            endianness: self.endianness(),
            entry_count: entries as u16,
        };
        buf[off..off + SchemaHeader::SIZE].copy_from_slice(hdr.as_bytes());
        off += SchemaHeader::SIZE;

        for e in registry.iter() {
            let w = build_schema_wire(e);
            buf[off..off + SchemaWire::SIZE].copy_from_slice(w.as_bytes());
            off += SchemaWire::SIZE;
        }

        // Section counts are always written, even when zero.
        buf[off..off + 2].copy_from_slice(&(enums as u16).to_ne_bytes());
        off += 2;
        for e in registry.iter() {
            for fi in enum_fields(e) {
                let w = build_enum_wire(e, fi);
                buf[off..off + EnumWire::SIZE].copy_from_slice(w.as_bytes());
                off += EnumWire::SIZE;
            }
        }

        buf[off..off + 2].copy_from_slice(&(bitfields as u16).to_ne_bytes());
        off += 2;
        for e in registry.iter() {
            for fi in bitfield_fields(e) {
                let w = build_bitfield_wire(e, fi);
                buf[off..off + BitfieldWire::SIZE].copy_from_slice(w.as_bytes());
                off += BitfieldWire::SIZE;
            }
        }

        debug_assert_eq!(off, needed);
        Ok(needed)
    }

    /// Stream the schema blob in fixed-size records via `emit`: the header,
    /// each schema entry, the enum count and entries, then the bitfield
    /// count and entries.
    ///
    /// Concatenating all chunks yields bytes identical to
    /// [`schema_serialize`](Self::schema_serialize); the total equals the
    /// size-query result. `emit` returning `false` aborts with
    /// [`BtlmError::Aborted`].
    pub fn schema_stream<F>(&self, mut emit: F) -> Result<usize>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let registry = self.registry();
        let (entries, enums, bitfields) = section_counts(registry);
        let mut total = 0usize;

        let mut send = |chunk: &[u8], total: &mut usize| -> Result<()> {
            if !emit(chunk) {
                return Err(BtlmError::Aborted);
            }
            *total += chunk.len();
            Ok(())
        };

        let hdr = SchemaHeader {
            endianness: self.endianness(),
            entry_count: entries as u16,
        };
        send(hdr.as_bytes(), &mut total)?;

        for e in registry.iter() {
            let w = build_schema_wire(e);
            send(w.as_bytes(), &mut total)?;
        }

        send(&(enums as u16).to_ne_bytes(), &mut total)?;
        for e in registry.iter() {
            for fi in enum_fields(e) {
                let w = build_enum_wire(e, fi);
                send(w.as_bytes(), &mut total)?;
            }
        }

        send(&(bitfields as u16).to_ne_bytes(), &mut total)?;
        for e in registry.iter() {
            for fi in bitfield_fields(e) {
                let w = build_bitfield_wire(e, fi);
                send(w.as_bytes(), &mut total)?;
            }
        }

        Ok(total)
    }
}

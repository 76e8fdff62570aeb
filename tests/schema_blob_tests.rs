//! Schema blob: exact sizes, decode-side parsing, stream equivalence

use btlm::{Context, FieldDef, FieldType, SchemaEntry, SchemaHeader, SchemaWire};

static VALUE_FIELDS: &[FieldDef] = &[FieldDef::scalar("value", 0, 4, FieldType::U32)];

static TEST_SCHEMA: SchemaEntry = SchemaEntry {
    id: 0,
    name: "test",
    description: "round trip schema",
    payload_size: 4,
    fields: VALUE_FIELDS,
};

#[test]
fn schema_roundtrip() {
    let mut ctx = Context::new(16).unwrap();
    ctx.register(&TEST_SCHEMA).unwrap();

    // One schema, zero enums, zero bitfields
    let needed = ctx.schema_serialize(None).unwrap();
    assert_eq!(needed, 3 + 1318 + 2 + 2);

    let mut blob = vec![0u8; needed];
    assert_eq!(ctx.schema_serialize(Some(&mut blob)).unwrap(), 1325);

    let hdr = SchemaHeader::read_from(&blob).unwrap();
    assert_eq!({ hdr.entry_count }, 1);
    let endianness = hdr.endianness;
    assert_eq!(endianness, if cfg!(target_endian = "little") { 0 } else { 1 });

    let entry = SchemaWire::read_from(&blob[SchemaHeader::SIZE..]).unwrap();
    assert_eq!({ entry.id }, 0);
    assert_eq!({ entry.payload_size }, 4);
    assert_eq!(entry.name_str(), "test");
    assert_eq!(entry.description_str(), "round trip schema");
    assert_eq!({ entry.field_count }, 1);

    let f = entry.fields[0];
    assert_eq!(f.name_str(), "value");
    assert_eq!({ f.offset }, 0);
    assert_eq!({ f.size }, 4);
    assert_eq!({ f.ty }, FieldType::U32 as u8);
    assert_eq!({ f.count }, 1);

    // Trailing section counts are present and zero
    let tail = &blob[3 + 1318..];
    assert_eq!(tail, &[0, 0, 0, 0]);
}

#[test]
fn stream_total_matches_size_query() {
    let mut ctx = Context::new(16).unwrap();
    ctx.register(&TEST_SCHEMA).unwrap();

    let mut collected = Vec::new();
    let total = ctx
        .schema_stream(|chunk| {
            collected.extend_from_slice(chunk);
            true
        })
        .unwrap();

    assert_eq!(total, ctx.schema_serialize(None).unwrap());

    let mut buffered = vec![0u8; total];
    ctx.schema_serialize(Some(&mut buffered)).unwrap();
    assert_eq!(collected, buffered);
}

#[test]
fn stream_chunks_are_fixed_records() {
    let mut ctx = Context::new(16).unwrap();
    ctx.register(&TEST_SCHEMA).unwrap();

    let mut sizes = Vec::new();
    ctx.schema_stream(|chunk| {
        sizes.push(chunk.len());
        true
    })
    .unwrap();

    // Header, one schema entry, enum count, bitfield count
    assert_eq!(sizes, vec![3, 1318, 2, 2]);
}

#[test]
fn unregistered_ids_leave_no_gaps() {
    static SPARSE: SchemaEntry = SchemaEntry {
        id: 9,
        name: "sparse",
        description: "",
        payload_size: 4,
        fields: VALUE_FIELDS,
    };

    let mut ctx = Context::new(16).unwrap();
    ctx.register(&TEST_SCHEMA).unwrap();
    ctx.register(&SPARSE).unwrap();

    // Ids 1..=8 are unregistered; the blob still packs two entries
    let needed = ctx.schema_serialize(None).unwrap();
    assert_eq!(needed, 3 + 2 * 1318 + 2 + 2);

    let mut blob = vec![0u8; needed];
    ctx.schema_serialize(Some(&mut blob)).unwrap();
    let second = SchemaWire::read_from(&blob[3 + 1318..]).unwrap();
    assert_eq!({ second.id }, 9);
    assert_eq!(second.name_str(), "sparse");
}

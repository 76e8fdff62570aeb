use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use btlm::{Context, Filter};

fn benchmark_drain_callback(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_callback");

    for capacity in [256u32, 4096] {
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(
            BenchmarkId::new("full_ring", capacity),
            &capacity,
            |b, &capacity| {
                let ctx = Context::new(capacity).unwrap();
                let id = ctx.consumer_open(Filter::all()).unwrap();

                b.iter(|| {
                    for i in 0..capacity {
                        ctx.log(0, &i);
                    }
                    let n = ctx.drain(id, |e| {
                        std::hint::black_box(e.payload());
                        true
                    });
                    assert_eq!(n.unwrap(), capacity as usize);
                });
            },
        );
    }

    group.finish();
}

fn benchmark_drain_packed(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_packed");

    for capacity in [256u32, 4096] {
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(
            BenchmarkId::new("full_ring", capacity),
            &capacity,
            |b, &capacity| {
                let ctx = Context::new(capacity).unwrap();
                let id = ctx.consumer_open(Filter::all()).unwrap();
                // Worst-case packet: header + full table + all payloads
                let mut buf = vec![0u8; 16 + capacity as usize * (16 + 8)];

                b.iter(|| {
                    for i in 0..capacity as u64 {
                        ctx.log(0, &i);
                    }
                    loop {
                        let n = ctx.drain_packed(id, &mut buf).unwrap();
                        if n == 0 {
                            break;
                        }
                        std::hint::black_box(&buf[..n]);
                    }
                });
            },
        );
    }

    group.finish();
}

fn benchmark_schema_serialize(c: &mut Criterion) {
    use btlm::{FieldDef, FieldType, SchemaEntry};

    static FIELDS: &[FieldDef] = &[
        FieldDef::scalar("a", 0, 8, FieldType::U64),
        FieldDef::scalar("b", 8, 4, FieldType::F32),
        FieldDef::scalar("c", 12, 4, FieldType::U32),
    ];
    static SCHEMAS: [SchemaEntry; 4] = [
        SchemaEntry { id: 0, name: "s0", description: "", payload_size: 16, fields: FIELDS },
        SchemaEntry { id: 1, name: "s1", description: "", payload_size: 16, fields: FIELDS },
        SchemaEntry { id: 2, name: "s2", description: "", payload_size: 16, fields: FIELDS },
        SchemaEntry { id: 3, name: "s3", description: "", payload_size: 16, fields: FIELDS },
    ];

    let mut ctx = Context::new(16).unwrap();
    for s in &SCHEMAS {
        ctx.register(s).unwrap();
    }
    let needed = ctx.schema_serialize(None).unwrap();
    let mut buf = vec![0u8; needed];

    c.bench_function("schema_serialize_4_entries", |b| {
        b.iter(|| ctx.schema_serialize(Some(&mut buf)).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_drain_callback,
    benchmark_drain_packed,
    benchmark_schema_serialize
);
criterion_main!(benches);

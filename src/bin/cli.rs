//! btlm demo tool: serve synthetic telemetry over TCP, or dump `.btlm` files.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Arg, Command};

use btlm::{
    field, BitDef, BitfieldDef, Context, EnumDef, FieldDef, LogReader, Result, SchemaEntry,
    SchemaHeader, SchemaWire, TcpServer,
};

/// Synthetic control-loop sample served by the demo producer.
#[repr(C)]
#[derive(Clone, Copy)]
struct LoopSample {
    counter: u64,
    position: f32,
    velocity: f32,
    mode: u8,
    status: u8,
}

static MODE_LABELS: EnumDef = EnumDef {
    labels: &["idle", "homing", "tracking", "fault"],
};

static STATUS_BITS: BitfieldDef = BitfieldDef {
    bits: &[
        BitDef { name: "enabled", start: 0, width: 1 },
        BitDef { name: "saturated", start: 1, width: 1 },
        BitDef { name: "gain_stage", start: 2, width: 2 },
    ],
};

static LOOP_FIELDS: &[FieldDef] = &[
    field!(LoopSample, counter, U64),
    field!(LoopSample, position, F32),
    field!(LoopSample, velocity, F32),
    field!(LoopSample, mode, enum & MODE_LABELS),
    field!(LoopSample, status, bits(U8) & STATUS_BITS),
];

static LOOP_SCHEMA: SchemaEntry = SchemaEntry {
    id: 0,
    name: "loop_sample",
    description: "Synthetic control loop state",
    payload_size: std::mem::size_of::<LoopSample>() as u16,
    fields: LOOP_FIELDS,
};

fn main() -> Result<()> {
    env_logger::init();

    let matches = Command::new("btlm-cli")
        .version(btlm::VERSION)
        .about("btlm telemetry demo tool")
        .subcommand(
            Command::new("serve")
                .about("Produce synthetic telemetry and serve it over TCP")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .default_value("9870"),
                )
                .arg(
                    Arg::new("hz")
                        .long("hz")
                        .value_name("HZ")
                        .help("Producer sample rate")
                        .default_value("1000"),
                )
                .arg(
                    Arg::new("seconds")
                        .long("seconds")
                        .value_name("SECS")
                        .help("Stop after this many seconds (default: run until killed)"),
                ),
        )
        .subcommand(
            Command::new("dump")
                .about("Print the contents of a .btlm log file")
                .arg(Arg::new("file").value_name("FILE").required(true))
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .help("Stop after N entries"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("serve", m)) => {
            let port: u16 = m.get_one::<String>("port").unwrap().parse().map_err(|_| {
                btlm::BtlmError::invalid_argument("port", "expected a port number")
            })?;
            let hz: u64 = m.get_one::<String>("hz").unwrap().parse().map_err(|_| {
                btlm::BtlmError::invalid_argument("hz", "expected a sample rate")
            })?;
            let seconds = m
                .get_one::<String>("seconds")
                .map(|s| s.parse::<u64>())
                .transpose()
                .map_err(|_| btlm::BtlmError::invalid_argument("seconds", "expected seconds"))?;
            serve(port, hz.max(1), seconds)
        }
        Some(("dump", m)) => {
            let file = m.get_one::<String>("file").unwrap();
            let limit = m
                .get_one::<String>("limit")
                .map(|s| s.parse::<usize>())
                .transpose()
                .map_err(|_| btlm::BtlmError::invalid_argument("limit", "expected a count"))?;
            dump(file, limit)
        }
        _ => {
            eprintln!("no subcommand; try --help");
            Ok(())
        }
    }
}

fn serve(port: u16, hz: u64, seconds: Option<u64>) -> Result<()> {
    let mut ctx = Context::new(4096)?;
    ctx.register(&LOOP_SCHEMA)?;
    let ctx = Arc::new(ctx);

    let server = TcpServer::bind(Arc::clone(&ctx), ("0.0.0.0", port))?;
    println!("serving on {}", server.local_addr()?);

    let running = Arc::new(AtomicBool::new(true));
    let producer = {
        let ctx = Arc::clone(&ctx);
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let period = Duration::from_nanos(1_000_000_000 / hz);
            let mut counter = 0u64;
            while running.load(Ordering::Relaxed) {
                let t = counter as f32 / hz as f32;
                let sample = LoopSample {
                    counter,
                    position: (t * 0.8).sin(),
                    velocity: 0.8 * (t * 0.8).cos(),
                    mode: ((counter / hz) % 4) as u8,
                    status: 0b0000_0101,
                };
                ctx.log(LOOP_SCHEMA.id, &sample);
                counter += 1;
                thread::sleep(period);
            }
        })
    };

    let started = Instant::now();
    loop {
        thread::sleep(Duration::from_millis(200));
        if let Some(secs) = seconds {
            if started.elapsed() >= Duration::from_secs(secs) {
                break;
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    let _ = producer.join();
    Ok(())
}

fn dump(path: &str, limit: Option<usize>) -> Result<()> {
    let reader = LogReader::open(path)?;
    let schema = reader.schema();

    let hdr = SchemaHeader::read_from(schema)
        .ok_or_else(|| btlm::BtlmError::invalid_argument("file", "schema blob too short"))?;
    let entry_count = { hdr.entry_count } as usize;

    // Schema id -> name lookup from the blob's fixed-stride entry table
    let mut names = std::collections::HashMap::new();
    for i in 0..entry_count {
        let off = SchemaHeader::SIZE + i * SchemaWire::SIZE;
        if let Some(w) = schema.get(off..).and_then(SchemaWire::read_from) {
            names.insert({ w.id }, w.name_str().to_string());
        }
    }

    println!(
        "{}: {} schemas, {} packets (index: {})",
        path,
        entry_count,
        reader.packet_count(),
        if reader.is_indexed() { "footer" } else { "rebuilt" },
    );

    let mut printed = 0usize;
    'outer: for view in reader.packets() {
        let pkt_hdr = view.header();
        if { pkt_hdr.dropped } > 0 {
            println!("  -- {} entries dropped --", { pkt_hdr.dropped });
        }
        for (eh, payload) in view.entries() {
            let id = { eh.id };
            let unknown = format!("id{}", id);
            let name = names.get(&id).map(String::as_str).unwrap_or(unknown.as_str());
            println!(
                "  {:>16} {:<20} {:3} bytes",
                { eh.timestamp },
                name,
                payload.len()
            );
            printed += 1;
            if let Some(n) = limit {
                if printed >= n {
                    break 'outer;
                }
            }
        }
    }

    Ok(())
}

//! # btlm - Zero-Copy Binary Telemetry
//!
//! btlm is a lock-free binary telemetry library designed to be linked into
//! latency-sensitive producers (control loops, server hot paths) and drained
//! by independent consumers in the same process.
//!
//! ## Features
//!
//! - **Wait-free producer path**: one relaxed `fetch_add` plus plain stores
//! - **Multi-producer / multi-consumer**: per-slot sequence publication,
//!   torn reads detected and accounted as drops
//! - **Lossy with accounting**: overwritten entries are counted per consumer,
//!   never silently lost
//! - **Packed batch drains**: self-delimiting packets with a fixed-stride
//!   entry table for transport
//! - **Self-describing**: a schema blob serialised once at startup lets
//!   decoders interpret raw payloads
//! - **Thin collaborators**: TCP serving and `.btlm` file persistence wrap
//!   the drain core
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 btlm Core                      │
//! ├────────────────────────────────────────────────┤
//! │  Ring (seq-published slots) │ Schema registry  │
//! │  - head claim counter       │ - descriptors    │
//! │  - torn-read recovery       │ - wire blob      │
//! │  Consumers (cursor + drops) │                  │
//! └────────────────────────────────────────────────┘
//!          │                        │
//!          ▼                        ▼
//! ┌─────────────────┐   ┌─────────────────────────┐
//! │  TCP serving    │   │  .btlm file persistence │
//! │  (serve)        │   │  (storage)              │
//! └─────────────────┘   └─────────────────────────┘
//! ```

// Core modules
pub mod clock;
pub mod consumer;
pub mod context;
pub mod drain;
pub mod entry;
pub mod error;
pub mod ring;
pub mod schema;
pub mod serialize;
pub mod wire;

// Transport and persistence collaborators
pub mod serve;
pub mod storage;

// Main API re-exports
pub use clock::{monotonic_ns, TimestampFn};
pub use consumer::Filter;
pub use context::Context;
pub use entry::Entry;
pub use error::{BtlmError, Result};
pub use ring::{ring_size, Ring};
pub use schema::{BitDef, BitfieldDef, EnumDef, FieldDef, FieldType, SchemaEntry};
pub use serve::TcpServer;
pub use storage::{LogReader, LogWriter};
pub use wire::{
    EntryHeader, IndexEntry, IndexFooter, PacketHeader, PacketView, SchemaHeader, SchemaWire,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Compile-time configuration constants.
///
/// Changing any of these changes the wire format; producer and decoder must
/// agree on all of them.
pub mod config {
    /// Maximum payload bytes per entry (232 keeps a slot at 256 bytes)
    pub const MAX_PAYLOAD: usize = 232;

    /// Fixed size of the consumer table
    pub const MAX_CLIENTS: usize = 8;

    /// Highest registrable schema id is `MAX_SCHEMA_ENTRIES - 1`
    pub const MAX_SCHEMA_ENTRIES: usize = 64;

    /// Fields serialised per schema entry
    pub const MAX_FIELDS: usize = 16;

    /// Fixed width of schema and field name strings on the wire
    pub const NAME_MAX: usize = 64;

    /// Fixed width of schema description strings on the wire
    pub const DESC_MAX: usize = 128;

    /// Maximum labels per enum field
    pub const ENUM_MAX_VALUES: usize = 64;

    /// Fixed width of one enum label on the wire (incl. terminator)
    pub const ENUM_LABEL_MAX: usize = 32;

    /// Maximum named sub-fields per bitfield
    pub const BITFIELD_MAX_BITS: usize = 16;

    /// Fixed width of one bit sub-field name on the wire
    pub const BIT_NAME_MAX: usize = 32;
}

//! `.btlm` log file persistence
//!
//! A thin sink of packed batches plus a footer index:
//!
//! ```text
//! [magic "BTLM" | u16 version | u32 schema_len]   10 bytes
//! [schema blob]
//! [packet 0] ... [packet N-1]
//! [IndexEntry x N]                                 28 bytes each
//! [IndexFooter]                                    16 bytes at EOF
//! ```
//!
//! The footer index enables seeking by timestamp without scanning the whole
//! file. A file closed without `finish` (crash) has no footer; the reader
//! falls back to a sequential scan and rebuilds the index.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::{
    context::Context,
    error::{BtlmError, Result},
    wire::{IndexEntry, IndexFooter, PacketView, INDEX_MAGIC},
};

/// Leading file magic.
pub const FILE_MAGIC: [u8; 4] = *b"BTLM";

/// Current file format version.
pub const FILE_VERSION: u16 = 1;

const FILE_HEADER_SIZE: usize = 10;

/// Timestamp range of a packet, scanned from its entry table.
/// Empty packets report `(0, 0)`.
fn packet_ts_range(view: &PacketView<'_>) -> (u64, u64) {
    let mut ts_min = u64::MAX;
    let mut ts_max = 0u64;
    for i in 0..view.entry_count() {
        if let Some(eh) = view.entry(i) {
            let ts = eh.timestamp;
            ts_min = ts_min.min(ts);
            ts_max = ts_max.max(ts);
        }
    }
    if ts_max == 0 && ts_min == u64::MAX {
        (0, 0)
    } else {
        (ts_min, ts_max)
    }
}

/// Writes packets to a `.btlm` file, appending the footer index on
/// [`finish`](Self::finish).
pub struct LogWriter {
    file: BufWriter<File>,
    index: Vec<IndexEntry>,
    offset: u64,
}

impl LogWriter {
    /// Create a log file carrying the context's current schema blob.
    pub fn create<P: AsRef<Path>>(path: P, ctx: &Context) -> Result<LogWriter> {
        let schema_len = ctx.schema_serialize(None)?;
        let mut schema = vec![0u8; schema_len];
        ctx.schema_serialize(Some(&mut schema))?;
        Self::create_with_schema(path, &schema)
    }

    /// Create a log file from a pre-serialised schema blob (e.g. one
    /// captured from a remote producer).
    pub fn create_with_schema<P: AsRef<Path>>(path: P, schema: &[u8]) -> Result<LogWriter> {
        let file = File::create(path).map_err(|e| BtlmError::from_io(e, "create log file"))?;
        let mut file = BufWriter::new(file);

        file.write_all(&FILE_MAGIC)?;
        file.write_all(&FILE_VERSION.to_ne_bytes())?;
        file.write_all(&(schema.len() as u32).to_ne_bytes())?;
        file.write_all(schema)?;

        Ok(LogWriter {
            file,
            index: Vec::new(),
            offset: (FILE_HEADER_SIZE + schema.len()) as u64,
        })
    }

    /// Append one packet as produced by
    /// [`drain_packed`](crate::Context::drain_packed). The packet framing is
    /// validated and its timestamp range recorded in the index.
    pub fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        let view = PacketView::parse(packet)?;
        let (ts_min, ts_max) = packet_ts_range(&view);

        self.index.push(IndexEntry {
            offset: self.offset,
            ts_min,
            ts_max,
            entry_count: view.entry_count() as u32,
        });

        self.file.write_all(&packet[..view.total_size()])?;
        self.offset += view.total_size() as u64;
        Ok(())
    }

    /// Packets written so far.
    pub fn packet_count(&self) -> usize {
        self.index.len()
    }

    /// Write the footer index and flush. Without this the file is still
    /// readable via the reader's sequential-scan fallback.
    pub fn finish(mut self) -> Result<()> {
        let index_offset = self.offset;
        for ie in &self.index {
            self.file.write_all(ie.as_bytes())?;
        }
        let footer = IndexFooter {
            index_offset,
            index_count: self.index.len() as u32,
            magic: INDEX_MAGIC,
        };
        self.file.write_all(footer.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Reads a `.btlm` file. The footer index is used when present; otherwise
/// the index is rebuilt by a sequential scan.
pub struct LogReader {
    data: Vec<u8>,
    schema_end: usize,
    index: Vec<IndexEntry>,
    indexed: bool,
}

impl LogReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<LogReader> {
        let data = fs::read(&path).map_err(|e| BtlmError::from_io(e, "read log file"))?;

        if data.len() < FILE_HEADER_SIZE {
            return Err(BtlmError::invalid_argument("file", "truncated header"));
        }
        if data[..4] != FILE_MAGIC {
            return Err(BtlmError::invalid_argument("file", "bad magic"));
        }
        let version = u16::from_ne_bytes([data[4], data[5]]);
        if version != FILE_VERSION {
            return Err(BtlmError::invalid_argument(
                "file",
                format!("unsupported version {}", version),
            ));
        }

        let schema_len = u32::from_ne_bytes([data[6], data[7], data[8], data[9]]) as usize;
        let schema_end = FILE_HEADER_SIZE + schema_len;
        if data.len() < schema_end {
            return Err(BtlmError::invalid_argument("file", "truncated schema"));
        }

        let mut reader = LogReader {
            data,
            schema_end,
            index: Vec::new(),
            indexed: false,
        };

        if !reader.try_load_index() {
            warn!("log file has no footer index, scanning sequentially");
            reader.scan_index();
        }

        Ok(reader)
    }

    /// Raw schema blob as written by the producer.
    pub fn schema(&self) -> &[u8] {
        &self.data[FILE_HEADER_SIZE..self.schema_end]
    }

    /// Whether the footer index was present (false after a crash-truncated
    /// write; the index is then rebuilt by scanning).
    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    pub fn packet_count(&self) -> usize {
        self.index.len()
    }

    pub fn packet(&self, i: usize) -> Result<PacketView<'_>> {
        let ie = self
            .index
            .get(i)
            .ok_or_else(|| BtlmError::invalid_argument("packet", "index out of range"))?;
        PacketView::parse(&self.data[ie.offset as usize..])
    }

    /// Iterate all packets in file order.
    pub fn packets(&self) -> impl Iterator<Item = PacketView<'_>> {
        self.index
            .iter()
            .filter_map(move |ie| PacketView::parse(&self.data[ie.offset as usize..]).ok())
    }

    /// Packets whose timestamp range overlaps `[ts_min, ts_max]`. Entries
    /// inside a returned packet may still fall outside the range; per-entry
    /// filtering is the caller's concern.
    pub fn packets_in_range(
        &self,
        ts_min: u64,
        ts_max: u64,
    ) -> impl Iterator<Item = PacketView<'_>> {
        self.index
            .iter()
            .filter(move |ie| {
                let lo = ie.ts_min;
                let hi = ie.ts_max;
                lo <= ts_max && hi >= ts_min
            })
            .filter_map(move |ie| PacketView::parse(&self.data[ie.offset as usize..]).ok())
    }

    /// Validate and load the footer index. Returns false when the footer is
    /// missing or inconsistent.
    fn try_load_index(&mut self) -> bool {
        if self.data.len() < self.schema_end + IndexFooter::SIZE {
            return false;
        }

        let footer = match IndexFooter::read_from(&self.data[self.data.len() - IndexFooter::SIZE..])
        {
            Some(f) => f,
            None => return false,
        };
        if { footer.magic } != INDEX_MAGIC {
            return false;
        }

        let index_offset = footer.index_offset as usize;
        let index_count = footer.index_count as usize;
        let expected = index_count * IndexEntry::SIZE + IndexFooter::SIZE;
        if index_offset.checked_add(expected) != Some(self.data.len()) {
            return false;
        }

        let mut index = Vec::with_capacity(index_count);
        for i in 0..index_count {
            let off = index_offset + i * IndexEntry::SIZE;
            match IndexEntry::read_from(&self.data[off..]) {
                Some(ie) => index.push(ie),
                None => return false,
            }
        }

        self.index = index;
        self.indexed = true;
        true
    }

    /// Rebuild the index by walking packets until the data runs out or
    /// stops framing cleanly.
    fn scan_index(&mut self) {
        let mut pos = self.schema_end;
        let mut index = Vec::new();

        while pos < self.data.len() {
            let view = match PacketView::parse(&self.data[pos..]) {
                Ok(v) => v,
                Err(_) => break,
            };
            let (ts_min, ts_max) = packet_ts_range(&view);
            index.push(IndexEntry {
                offset: pos as u64,
                ts_min,
                ts_max,
                entry_count: view.entry_count() as u32,
            });
            pos += view.total_size();
        }

        self.index = index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{EntryHeader, PacketHeader};

    fn build_packet(entries: &[(u16, u64, &[u8])]) -> Vec<u8> {
        let mut table = Vec::new();
        let mut payload = Vec::new();
        for &(id, timestamp, data) in entries {
            let eh = EntryHeader {
                id,
                payload_size: data.len() as u16,
                payload_offset: payload.len() as u32,
                timestamp,
            };
            table.extend_from_slice(eh.as_bytes());
            payload.extend_from_slice(data);
        }
        let hdr = PacketHeader {
            entry_count: entries.len() as u16,
            flags: 0,
            payload_size: payload.len() as u32,
            dropped: 0,
            reserved: 0,
        };
        let mut pkt = hdr.as_bytes().to_vec();
        pkt.extend_from_slice(&table);
        pkt.extend_from_slice(&payload);
        pkt
    }

    #[test]
    fn test_ts_range_of_hand_built_packet() {
        let pkt = build_packet(&[(0, 500, b"aaaa"), (1, 100, b"bb"), (0, 900, b"c")]);
        let view = PacketView::parse(&pkt).unwrap();
        assert_eq!(packet_ts_range(&view), (100, 900));

        let empty = build_packet(&[]);
        let view = PacketView::parse(&empty).unwrap();
        assert_eq!(packet_ts_range(&view), (0, 0));
    }
}

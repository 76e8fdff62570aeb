//! TCP serving collaborator
//!
//! A thin wrapper over the drain core: an accept thread opens one consumer
//! per connection and hands it to a client thread, which sends the
//! length-prefixed schema blob once and then length-prefixed packed batches
//! until the peer disconnects or the server stops.
//!
//! Framing: `[u32 schema_len][schema blob]` once, then repeatedly
//! `[u32 packet_len][packet]`, all integers in producer byte order.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::{
    consumer::Filter,
    context::Context,
    error::{BtlmError, Result},
    wire::PacketHeader,
};

/// Per-client packet staging buffer
const PKT_BUF_SIZE: usize = 65536;

/// Sleep between drains when the ring is empty
const EMPTY_POLL: Duration = Duration::from_millis(1);

/// A client that cannot take a packet within this window is disconnected
/// rather than allowed to wedge its drain thread.
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Periodic per-client status log interval
const STATUS_PERIOD: Duration = Duration::from_secs(2);

struct ClientConn {
    /// Duplicate handle used to shut the socket down from `stop`
    stream: TcpStream,
    handle: JoinHandle<()>,
}

struct ServerShared {
    ctx: Arc<Context>,
    listener: TcpListener,
    running: AtomicBool,
    clients: Mutex<Vec<ClientConn>>,
}

/// TCP telemetry server. Stops and joins its threads on drop.
pub struct TcpServer {
    shared: Arc<ServerShared>,
    accept_handle: Option<JoinHandle<()>>,
}

impl TcpServer {
    /// Bind and start serving. Each accepted connection consumes one slot of
    /// the context's consumer table; connections beyond the table size are
    /// rejected at accept time.
    pub fn bind<A: ToSocketAddrs>(ctx: Arc<Context>, addr: A) -> Result<TcpServer> {
        let listener = TcpListener::bind(addr).map_err(|e| BtlmError::from_io(e, "bind"))?;

        let shared = Arc::new(ServerShared {
            ctx,
            listener,
            running: AtomicBool::new(true),
            clients: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_handle = thread::Builder::new()
            .name("btlm-accept".into())
            .spawn(move || accept_loop(accept_shared))
            .map_err(|e| BtlmError::from_io(e, "spawn accept thread"))?;

        Ok(TcpServer {
            shared,
            accept_handle: Some(accept_handle),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.shared
            .listener
            .local_addr()
            .map_err(|e| BtlmError::from_io(e, "local_addr"))
    }

    /// Stop accepting, disconnect all clients, and join the worker threads.
    /// Idempotent.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // Unblock the accept thread; there is no std shutdown for listeners.
        unsafe {
            libc::shutdown(self.shared.listener.as_raw_fd(), libc::SHUT_RDWR);
        }
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }

        // Unblock client writes/polls, then wait for them to finish.
        let clients = std::mem::take(&mut *self.shared.clients.lock().unwrap());
        for c in &clients {
            let _ = c.stream.shutdown(Shutdown::Both);
        }
        for c in clients {
            let _ = c.handle.join();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(shared: Arc<ServerShared>) {
    while shared.running.load(Ordering::SeqCst) {
        let (stream, peer) = match shared.listener.accept() {
            Ok(conn) => conn,
            // Listener was shut down or broke; either way we are done.
            Err(_) => break,
        };

        let consumer_id = match shared.ctx.consumer_open(Filter::all()) {
            Ok(id) => id,
            Err(_) => {
                warn!("rejecting {}: consumer table full", peer);
                continue;
            }
        };

        let dup = match stream.try_clone() {
            Ok(dup) => dup,
            Err(e) => {
                warn!("rejecting {}: {}", peer, e);
                shared.ctx.consumer_close(consumer_id);
                continue;
            }
        };

        let worker_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("btlm-client-{}", consumer_id))
            .spawn(move || client_loop(worker_shared, stream, consumer_id, peer));

        match spawned {
            Ok(handle) => {
                let mut clients = shared.clients.lock().unwrap();
                clients.retain(|c| !c.handle.is_finished());
                clients.push(ClientConn { stream: dup, handle });
            }
            Err(e) => {
                warn!("spawn failed for {}: {}", peer, e);
                shared.ctx.consumer_close(consumer_id);
            }
        }
    }
}

fn client_loop(shared: Arc<ServerShared>, mut stream: TcpStream, consumer_id: usize, peer: SocketAddr) {
    let ctx = &shared.ctx;
    let _ = stream.set_write_timeout(Some(SEND_TIMEOUT));

    info!("client {} connected ({})", consumer_id, peer);

    if let Err(e) = send_schema(ctx, &mut stream) {
        warn!("client {}: schema send failed: {}", consumer_id, e);
        ctx.consumer_close(consumer_id);
        return;
    }

    let mut pkt_buf = vec![0u8; PKT_BUF_SIZE];
    let mut total_bytes: u64 = 0;
    let mut total_pkts: u64 = 0;
    let mut total_dropped: u64 = 0;
    let mut last_report = Instant::now();

    while shared.running.load(Ordering::SeqCst) {
        match ctx.drain_packed(consumer_id, &mut pkt_buf) {
            Ok(0) => thread::sleep(EMPTY_POLL),
            Ok(n) => {
                let frame_len = (n as u32).to_ne_bytes();
                let sent = send_all(&mut stream, &frame_len)
                    .and_then(|_| send_all(&mut stream, &pkt_buf[..n]));
                if let Err(e) = sent {
                    warn!(
                        "client {} send failed after {} pkts / {} bytes ({}), disconnecting",
                        consumer_id, total_pkts, total_bytes, e
                    );
                    break;
                }
                total_bytes += 4 + n as u64;
                total_pkts += 1;
                if let Some(hdr) = PacketHeader::read_from(&pkt_buf) {
                    total_dropped += { hdr.dropped } as u64;
                }
            }
            Err(_) => break,
        }

        if last_report.elapsed() >= STATUS_PERIOD {
            debug!(
                "client {} status: {} pkts, {} bytes, dropped={}",
                consumer_id, total_pkts, total_bytes, total_dropped
            );
            last_report = Instant::now();
        }
    }

    ctx.consumer_close(consumer_id);
    info!("client {} disconnected", consumer_id);
}

/// Length-prefixed schema blob, streamed chunk by chunk so no blob-sized
/// buffer is needed.
fn send_schema(ctx: &Context, stream: &mut TcpStream) -> Result<()> {
    let schema_len = ctx.schema_serialize(None)? as u32;
    send_all(stream, &schema_len.to_ne_bytes()).map_err(|e| BtlmError::from_io(e, "schema len"))?;
    ctx.schema_stream(|chunk| send_all(stream, chunk).is_ok())?;
    Ok(())
}

fn send_all(stream: &mut TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

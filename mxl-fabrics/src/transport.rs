// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! The TCP provider: RDMA-write emulation over loopback/LAN sockets.
//!
//! Each RDMA write travels as one frame: a fixed header naming the
//! destination region, offset and length plus the immediate word, followed
//! by the payload bytes. The receiving side lands payload bytes directly in
//! the registered region memory, so the data path stays copy-free on the
//! target apart from the socket itself, and surfaces one completion per
//! frame exactly like a hardware completion queue would.
//!
//! The TCP provider uses offset addressing: remote addresses are zero-based
//! within each region. Everything here is non-blocking; sockets are only
//! touched from the owning endpoint's progress calls.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, warn};

use crate::address::EndpointAddress;
use crate::error::{Error, Result};
use crate::regions::Region;

const FRAME_MAGIC: u32 = 0x4D58_4C46; // "MXLF"
const FRAME_HEADER_LEN: usize = 32;

/// Header of one emulated RDMA write.
#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    region: u32,
    offset: u64,
    len: u64,
    imm: Option<u32>,
}

impl FrameHeader {
    fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&FRAME_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.region.to_le_bytes());
        out[8..16].copy_from_slice(&self.offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.len.to_le_bytes());
        out[24..28].copy_from_slice(&(self.imm.is_some() as u32).to_le_bytes());
        out[28..32].copy_from_slice(&self.imm.unwrap_or(0).to_le_bytes());
        out
    }

    fn decode(buf: &[u8; FRAME_HEADER_LEN]) -> Result<Self> {
        if u32::from_le_bytes(buf[0..4].try_into().unwrap()) != FRAME_MAGIC {
            return Err(Error::Internal("bad frame magic on ingress".into()));
        }
        let has_imm = u32::from_le_bytes(buf[24..28].try_into().unwrap()) != 0;
        Ok(Self {
            region: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            len: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            imm: has_imm.then(|| u32::from_le_bytes(buf[28..32].try_into().unwrap())),
        })
    }
}

/// A completion harvested from the emulated completion queue.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Completion {
    /// Immediate data delivered with the write, if the sender attached any.
    pub imm: Option<u32>,
}

enum IngressState {
    Header { buf: [u8; FRAME_HEADER_LEN], filled: usize },
    Payload { header: FrameHeader, received: u64 },
}

struct IngressConn {
    stream: TcpStream,
    peer: SocketAddr,
    state: IngressState,
}

/// Receiving endpoint: accepts connections and lands writes in registered
/// region memory.
pub(crate) struct IngressEndpoint {
    listener: TcpListener,
    conns: Vec<IngressConn>,
    completions: VecDeque<Completion>,
}

impl IngressEndpoint {
    /// Binds the listening socket and returns the resolved endpoint address.
    pub(crate) fn bind(bind_address: &str) -> Result<(Self, EndpointAddress)> {
        let listener = TcpListener::bind(bind_address)
            .map_err(|e| Error::NoFabric(format!("cannot bind {bind_address}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::Internal(format!("set_nonblocking: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::Internal(format!("local_addr: {e}")))?;
        let address = EndpointAddress::from_bytes(local.to_string().into_bytes());
        Ok((
            Self {
                listener,
                conns: Vec::new(),
                completions: VecDeque::new(),
            },
            address,
        ))
    }

    /// Drives ingress: accepts pending connections and drains readable
    /// frames into the registered regions. Never blocks.
    pub(crate) fn poll(&mut self, regions: &[Region]) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("dropping ingress connection from {peer}: {e}");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    debug!("accepted ingress connection from {peer}");
                    self.conns.push(IngressConn {
                        stream,
                        peer,
                        state: IngressState::Header {
                            buf: [0; FRAME_HEADER_LEN],
                            filled: 0,
                        },
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Internal(format!("accept failed: {e}"))),
            }
        }

        let mut closed = Vec::new();
        for (conn_index, conn) in self.conns.iter_mut().enumerate() {
            match drain_conn(conn, regions, &mut self.completions) {
                Ok(true) => {}
                Ok(false) => closed.push(conn_index),
                Err(e) => {
                    warn!("dropping ingress connection from {}: {e}", conn.peer);
                    closed.push(conn_index);
                }
            }
        }
        for conn_index in closed.into_iter().rev() {
            self.conns.remove(conn_index);
        }
        Ok(())
    }

    /// Pops the next harvested completion.
    pub(crate) fn next_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }
}

/// Reads whatever is available on one connection. Returns `Ok(false)` on a
/// clean remote shutdown.
fn drain_conn(
    conn: &mut IngressConn,
    regions: &[Region],
    completions: &mut VecDeque<Completion>,
) -> Result<bool> {
    loop {
        match &mut conn.state {
            IngressState::Header { buf, filled } => {
                match conn.stream.read(&mut buf[*filled..]) {
                    Ok(0) => return Ok(false),
                    Ok(n) => {
                        *filled += n;
                        if *filled == FRAME_HEADER_LEN {
                            let header = FrameHeader::decode(buf)?;
                            validate_frame(&header, regions)?;
                            if header.len == 0 {
                                completions.push_back(Completion { imm: header.imm });
                                conn.state = IngressState::Header {
                                    buf: [0; FRAME_HEADER_LEN],
                                    filled: 0,
                                };
                            } else {
                                conn.state = IngressState::Payload {
                                    header,
                                    received: 0,
                                };
                            }
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::Internal(format!("ingress read: {e}"))),
                }
            }
            IngressState::Payload { header, received } => {
                let region = &regions[header.region as usize];
                let remaining = (header.len - *received) as usize;
                // Safety: validate_frame checked that offset + len stay
                // within the registered region, whose mapping outlives the
                // endpoint.
                let dst = unsafe {
                    std::slice::from_raw_parts_mut(
                        (region.addr as *mut u8)
                            .add(header.offset as usize + *received as usize),
                        remaining,
                    )
                };
                match conn.stream.read(dst) {
                    Ok(0) => return Ok(false),
                    Ok(n) => {
                        *received += n as u64;
                        if *received == header.len {
                            completions.push_back(Completion { imm: header.imm });
                            conn.state = IngressState::Header {
                                buf: [0; FRAME_HEADER_LEN],
                                filled: 0,
                            };
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(Error::Internal(format!("ingress read: {e}"))),
                }
            }
        }
    }
}

fn validate_frame(header: &FrameHeader, regions: &[Region]) -> Result<()> {
    let region = regions
        .get(header.region as usize)
        .ok_or_else(|| Error::Internal(format!("write to unknown region {}", header.region)))?;
    let end = header
        .offset
        .checked_add(header.len)
        .ok_or_else(|| Error::Internal("write range overflow".into()))?;
    if end > region.len as u64 {
        return Err(Error::Internal(format!(
            "write of {} bytes at offset {} exceeds region {} ({} bytes)",
            header.len, header.offset, header.region, region.len
        )));
    }
    Ok(())
}

struct PendingWrite {
    header: [u8; FRAME_HEADER_LEN],
    header_sent: usize,
    src_addr: usize,
    src_len: usize,
    payload_sent: usize,
}

/// Sending side of one connection to a target.
pub(crate) struct EgressConnection {
    stream: TcpStream,
    peer: SocketAddr,
    queue: VecDeque<PendingWrite>,
}

impl EgressConnection {
    /// Establishes the connection. Called from within a progress cycle.
    pub(crate) fn connect(peer: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(peer)
            .map_err(|e| Error::Internal(format!("connect {peer}: {e}")))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| Error::Internal(format!("set_nonblocking: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            stream,
            peer,
            queue: VecDeque::new(),
        })
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues one emulated RDMA write. No I/O happens here.
    ///
    /// The source range must stay mapped and stable until the write drains;
    /// flow-backed regions guarantee this because the ring slot is not
    /// reused while it is still inside the readable window.
    pub(crate) fn enqueue_write(
        &mut self,
        region: u32,
        offset: u64,
        src_addr: usize,
        src_len: usize,
        imm: Option<u32>,
    ) {
        let header = FrameHeader {
            region,
            offset,
            len: src_len as u64,
            imm,
        };
        self.queue.push_back(PendingWrite {
            header: header.encode(),
            header_sent: 0,
            src_addr,
            src_len,
            payload_sent: 0,
        });
    }

    /// Pushes queued bytes into the socket. Returns `true` once the queue is
    /// empty. Never blocks.
    pub(crate) fn progress(&mut self) -> Result<bool> {
        while let Some(write) = self.queue.front_mut() {
            while write.header_sent < FRAME_HEADER_LEN {
                match self.stream.write(&write.header[write.header_sent..]) {
                    Ok(0) => {
                        return Err(Error::Internal(format!("{} closed mid-frame", self.peer)));
                    }
                    Ok(n) => write.header_sent += n,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(Error::Internal(format!("write to {}: {e}", self.peer)));
                    }
                }
            }
            while write.payload_sent < write.src_len {
                // Safety: the enqueuer guarantees the source mapping stays
                // valid until the write drains.
                let src = unsafe {
                    std::slice::from_raw_parts(
                        (write.src_addr as *const u8).add(write.payload_sent),
                        write.src_len - write.payload_sent,
                    )
                };
                match self.stream.write(src) {
                    Ok(0) => {
                        return Err(Error::Internal(format!("{} closed mid-frame", self.peer)));
                    }
                    Ok(n) => write.payload_sent += n,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return Err(Error::Internal(format!("write to {}: {e}", self.peer)));
                    }
                }
            }
            self.queue.pop_front();
        }
        Ok(true)
    }

    /// Graceful shutdown after the queue drained.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

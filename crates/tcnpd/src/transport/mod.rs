// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction for PD telegrams.
//!
//! The engine never touches sockets directly; it holds indices into a
//! refcounted socket table managed by the transport. Sockets are shared by
//! (port, multicast group) and released when the last endpoint referencing
//! them goes away.

pub mod udp;

pub use udp::UdpTransport;

use crate::error::Result;
use std::collections::VecDeque;
use std::net::Ipv4Addr;

/// Metadata of one received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Datagram length in octets
    pub len: usize,
    /// Sender address
    pub src: Ipv4Addr,
    /// Address the datagram was delivered to (distinguishes unicast from the
    /// multicast group that actually delivered it)
    pub dst: Ipv4Addr,
}

/// Socket table operations the engine consumes.
pub trait Transport {
    /// Acquire a socket bound to `port`, joining `group` when given. An
    /// existing socket with the same (port, group) is shared and its
    /// reference count incremented. Returns the socket table index.
    fn request(&mut self, port: u16, group: Option<Ipv4Addr>) -> Result<usize>;

    /// Drop one reference to a socket; the socket is closed when the last
    /// reference is gone.
    fn release(&mut self, idx: usize);

    /// Send one telegram.
    fn send(&mut self, idx: usize, frame: &[u8], dest: Ipv4Addr, port: u16) -> Result<()>;

    /// Nonblocking receive of one datagram into `buf`.
    ///
    /// `Ok(None)` means the socket is drained.
    fn recv(&mut self, idx: usize, buf: &mut [u8]) -> Result<Option<Received>>;
}

// ============================================================================
// In-memory transport (for testing)
// ============================================================================

/// One telegram captured by [`MemTransport`].
#[derive(Debug, Clone)]
pub struct SentFrame {
    /// Socket the telegram left through
    pub socket: usize,
    /// Wire bytes
    pub bytes: Vec<u8>,
    /// Destination address
    pub dest: Ipv4Addr,
    /// Destination port
    pub port: u16,
}

#[derive(Debug, Default)]
struct MemSocket {
    refs: u32,
    port: u16,
    group: Option<Ipv4Addr>,
    inbound: VecDeque<(Vec<u8>, Ipv4Addr, Ipv4Addr)>,
}

/// Scriptable in-memory transport.
///
/// Captures everything sent and replays queued inbound datagrams; never
/// touches the network.
#[derive(Debug, Default)]
pub struct MemTransport {
    sockets: Vec<Option<MemSocket>>,
    /// Every telegram sent, in order.
    pub sent: Vec<SentFrame>,
    /// Force the next sends to fail (I/O error injection).
    pub fail_sends: bool,
}

impl MemTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound datagram on socket `idx`.
    pub fn push_inbound(&mut self, idx: usize, bytes: &[u8], src: Ipv4Addr, dst: Ipv4Addr) {
        if let Some(Some(sock)) = self.sockets.get_mut(idx) {
            sock.inbound.push_back((bytes.to_vec(), src, dst));
        }
    }

    /// Number of live sockets in the table.
    pub fn open_sockets(&self) -> usize {
        self.sockets.iter().filter(|s| s.is_some()).count()
    }
}

impl Transport for MemTransport {
    fn request(&mut self, port: u16, group: Option<Ipv4Addr>) -> Result<usize> {
        for (idx, slot) in self.sockets.iter_mut().enumerate() {
            if let Some(sock) = slot {
                if sock.port == port && sock.group == group {
                    sock.refs += 1;
                    return Ok(idx);
                }
            }
        }
        let sock = MemSocket {
            refs: 1,
            port,
            group,
            inbound: VecDeque::new(),
        };
        if let Some(idx) = self.sockets.iter().position(|s| s.is_none()) {
            self.sockets[idx] = Some(sock);
            Ok(idx)
        } else {
            self.sockets.push(Some(sock));
            Ok(self.sockets.len() - 1)
        }
    }

    fn release(&mut self, idx: usize) {
        if let Some(Some(sock)) = self.sockets.get_mut(idx) {
            sock.refs -= 1;
            if sock.refs == 0 {
                self.sockets[idx] = None;
            }
        }
    }

    fn send(&mut self, idx: usize, frame: &[u8], dest: Ipv4Addr, port: u16) -> Result<()> {
        if self.fail_sends {
            return Err(crate::error::PdError::Io);
        }
        self.sent.push(SentFrame {
            socket: idx,
            bytes: frame.to_vec(),
            dest,
            port,
        });
        Ok(())
    }

    fn recv(&mut self, idx: usize, buf: &mut [u8]) -> Result<Option<Received>> {
        let Some(Some(sock)) = self.sockets.get_mut(idx) else {
            return Err(crate::error::PdError::Param);
        };
        let Some((bytes, src, dst)) = sock.inbound.pop_front() else {
            return Ok(None);
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(Some(Received { len, src, dst }))
    }
}

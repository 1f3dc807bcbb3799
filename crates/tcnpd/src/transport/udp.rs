// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP transport for PD telegrams.
//!
//! Sockets are built with socket2 (reuse-address, nonblocking, multicast
//! join), registered with a mio `Poll` for readiness and shared per
//! (port, multicast group) with reference counting. The work loop blocks in
//! [`UdpTransport::wait`]; the engine itself never blocks.

use crate::error::{PdError, Result};
use crate::transport::{Received, Transport};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

struct UdpSlot {
    refs: u32,
    port: u16,
    group: Option<Ipv4Addr>,
    socket: mio::net::UdpSocket,
}

/// Refcounted UDP socket table with mio readiness.
pub struct UdpTransport {
    own_ip: Ipv4Addr,
    ttl: u32,
    poll: Poll,
    events: Events,
    slots: Vec<Option<UdpSlot>>,
}

impl UdpTransport {
    /// Create a transport sending from `own_ip` interfaces.
    pub fn new(own_ip: Ipv4Addr, ttl: u32) -> io::Result<Self> {
        Ok(Self {
            own_ip,
            ttl,
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            slots: Vec::new(),
        })
    }

    /// Block until at least one socket is readable or `timeout` elapses.
    /// Returns the ready socket indices.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<Vec<usize>> {
        self.events.clear();
        self.poll.poll(&mut self.events, Some(timeout))?;
        let mut ready = Vec::new();
        for event in self.events.iter() {
            let idx = event.token().0;
            if !ready.contains(&idx) {
                ready.push(idx);
            }
        }
        Ok(ready)
    }

    fn open_socket(&self, port: u16, group: Option<Ipv4Addr>) -> io::Result<std::net::UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.set_ttl(self.ttl)?;
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&bind_addr.into())?;
        if let Some(group) = group {
            socket.join_multicast_v4(&group, &self.own_ip)?;
            socket.set_multicast_loop_v4(true)?;
            log::debug!("[UDP] joined multicast group {} on {}", group, self.own_ip);
        }
        log::debug!("[UDP] socket bound to 0.0.0.0:{}", port);
        Ok(socket.into())
    }
}

impl Transport for UdpTransport {
    fn request(&mut self, port: u16, group: Option<Ipv4Addr>) -> Result<usize> {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                if slot.port == port && slot.group == group {
                    slot.refs += 1;
                    return Ok(idx);
                }
            }
        }

        let idx = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .unwrap_or(self.slots.len());
        let std_socket = self.open_socket(port, group).map_err(|err| {
            log::error!("[UDP] socket setup failed: {}", err);
            PdError::Io
        })?;
        let mut socket = mio::net::UdpSocket::from_std(std_socket);
        self.poll
            .registry()
            .register(&mut socket, Token(idx), Interest::READABLE)
            .map_err(|err| {
                log::error!("[UDP] socket registration failed: {}", err);
                PdError::Io
            })?;

        let slot = UdpSlot {
            refs: 1,
            port,
            group,
            socket,
        };
        if idx == self.slots.len() {
            self.slots.push(Some(slot));
        } else {
            self.slots[idx] = Some(slot);
        }
        Ok(idx)
    }

    fn release(&mut self, idx: usize) {
        let Some(slot_opt) = self.slots.get_mut(idx) else {
            return;
        };
        let Some(slot) = slot_opt.as_mut() else {
            return;
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return;
        }
        if let Some(mut slot) = slot_opt.take() {
            if let Err(err) = self.poll.registry().deregister(&mut slot.socket) {
                log::warn!("[UDP] socket deregistration failed: {}", err);
            }
        }
    }

    fn send(&mut self, idx: usize, frame: &[u8], dest: Ipv4Addr, port: u16) -> Result<()> {
        let Some(Some(slot)) = self.slots.get(idx) else {
            return Err(PdError::Param);
        };
        let dest = SocketAddr::V4(SocketAddrV4::new(dest, port));
        match slot.socket.send_to(frame, dest) {
            Ok(sent) if sent == frame.len() => Ok(()),
            Ok(sent) => {
                log::error!("[UDP] short send ({} of {} octets)", sent, frame.len());
                Err(PdError::Io)
            }
            Err(err) => {
                log::error!("[UDP] send to {} failed: {}", dest, err);
                Err(PdError::Io)
            }
        }
    }

    fn recv(&mut self, idx: usize, buf: &mut [u8]) -> Result<Option<Received>> {
        let Some(Some(slot)) = self.slots.get(idx) else {
            return Err(PdError::Param);
        };
        match slot.socket.recv_from(buf) {
            Ok((len, SocketAddr::V4(src))) => Ok(Some(Received {
                len,
                src: *src.ip(),
                // Without per-packet destination info the delivery address is
                // the joined group for multicast sockets, else our own.
                dst: slot.group.unwrap_or(self.own_ip),
            })),
            Ok((_, SocketAddr::V6(_))) => Err(PdError::Wire),
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => {
                log::warn!("[UDP] recv failed: {}", err);
                Err(PdError::Io)
            }
        }
    }
}

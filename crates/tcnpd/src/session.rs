// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PD session: queues, statistics and the application surface.
//!
//! A [`PdSession`] owns the element arena, the send and receive queues, the
//! socket table (via its transport) and the receive scratch frame. All state
//! is mutated from the application's work thread through the process entry
//! points ([`PdSession::send_due`], [`PdSession::receive`],
//! [`PdSession::check_pending`], [`PdSession::check_listen_socks`],
//! [`PdSession::handle_timeouts`]); there are no internal locks and callbacks
//! run on the same thread.

use crate::config::{PdConfig, SessionOptions, GLOBAL_STATISTICS_COMID, MAX_PROCESS_WAIT};
use crate::element::{
    AddressSpec, ElemStats, PdCallback, PdElement, PktFlags, PrivFlags, SharedMarshaller,
};
use crate::error::{PdError, Result};
use crate::queue::{self, Arena, ElemId};
use crate::stats::{PdStats, StatsSnapshot};
use crate::transport::Transport;
use crate::wire::{Frame, MsgType};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Engine version stamped into statistics snapshots (major.minor.patch.0).
pub const ENGINE_VERSION: u32 = 0x0002_0000;

/// Handle to a published endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubHandle(pub(crate) ElemId);

/// Handle to a subscribed endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHandle(pub(crate) ElemId);

/// One PD communication session.
pub struct PdSession<T: Transport> {
    pub(crate) transport: T,
    pub(crate) arena: Arena,
    pub(crate) snd_queue: Vec<ElemId>,
    pub(crate) rcv_queue: Vec<ElemId>,
    pub(crate) stats: PdStats,
    pub(crate) scratch: Frame,
    pub(crate) own_ip: Ipv4Addr,
    pub(crate) etb_topo_cnt: u32,
    pub(crate) op_trn_topo_cnt: u32,
    pub(crate) config: PdConfig,
    pub(crate) options: SessionOptions,
    pub(crate) callback: Option<PdCallback>,
    pub(crate) marshaller: Option<SharedMarshaller>,
    pub(crate) next_job: Option<Instant>,
    started: Instant,
    stats_reset: Instant,
}

impl<T: Transport> PdSession<T> {
    /// Open a session.
    ///
    /// The GLOBAL_STATISTICS reply element is published here (pull-only) so a
    /// remote statistics request always finds its publisher.
    pub fn new(
        mut transport: T,
        own_ip: Ipv4Addr,
        config: PdConfig,
        options: SessionOptions,
        callback: Option<PdCallback>,
        now: Instant,
    ) -> Result<Self> {
        let stats_socket = transport.request(config.port, None)?;

        let mut session = Self {
            transport,
            arena: Arena::new(),
            snd_queue: Vec::new(),
            rcv_queue: Vec::new(),
            stats: PdStats::default(),
            scratch: Frame::max(),
            own_ip,
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
            config,
            options,
            callback,
            marshaller: None,
            next_job: None,
            started: now,
            stats_reset: now,
        };

        // Built-in statistics publisher, emitted only when pulled.
        let addr = AddressSpec {
            com_id: GLOBAL_STATISTICS_COMID,
            src_ip: own_ip,
            dest_ip: Ipv4Addr::UNSPECIFIED,
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
        };
        let mut frame = Frame::new(StatsSnapshot::WIRE_SIZE);
        frame.init_header(
            MsgType::Pd,
            GLOBAL_STATISTICS_COMID,
            0,
            0,
            0,
            0,
            Ipv4Addr::UNSPECIFIED,
        );
        let mut elem = PdElement::new(addr, None, PktFlags::NONE, frame, 0);
        elem.socket_idx = Some(stats_socket);
        let id = session.arena.insert(elem);
        session.snd_queue.push(id);
        session.stats.num_pub += 1;

        log::info!("[PD] session opened on {}", own_ip);
        Ok(session)
    }

    /// Own IP address of this session.
    pub fn own_ip(&self) -> Ipv4Addr {
        self.own_ip
    }

    /// Aggregate PD counters.
    pub fn stats(&self) -> &PdStats {
        &self.stats
    }

    /// Traffic counters of a publisher.
    pub fn pub_stats(&self, handle: PubHandle) -> Option<ElemStats> {
        self.arena.get(handle.0).map(|e| e.stats)
    }

    /// Traffic counters of a subscription.
    pub fn sub_stats(&self, handle: SubHandle) -> Option<ElemStats> {
        self.arena.get(handle.0).map(|e| e.stats)
    }

    /// Access the transport (e.g. for the work loop's blocking wait).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Set the session topology counters used for frame stamping and gating.
    pub fn set_topo_counts(&mut self, etb_topo_cnt: u32, op_trn_topo_cnt: u32) {
        self.etb_topo_cnt = etb_topo_cnt;
        self.op_trn_topo_cnt = op_trn_topo_cnt;
    }

    /// Install the application marshaller used by MARSHALL-flagged endpoints.
    pub fn set_marshaller(&mut self, marshaller: Option<SharedMarshaller>) {
        self.marshaller = marshaller;
    }

    // ========================================================================
    // Publisher side
    // ========================================================================

    /// Publish a ComID.
    ///
    /// `interval = None` registers a pull-only publisher that emits solely on
    /// request. With initial `data` the telegram is valid immediately;
    /// otherwise [`PdSession::put`] must mark it valid first.
    pub fn publish(
        &mut self,
        com_id: u32,
        dest_ip: Ipv4Addr,
        interval: Option<Duration>,
        flags: PktFlags,
        data: Option<&[u8]>,
        now: Instant,
    ) -> Result<PubHandle> {
        if com_id == 0 {
            return Err(PdError::Param);
        }

        let socket_idx = self.transport.request(self.config.port, None)?;
        let data_size = data.map_or(0, <[u8]>::len);
        let addr = AddressSpec {
            com_id,
            src_ip: self.own_ip,
            dest_ip,
            etb_topo_cnt: self.etb_topo_cnt,
            op_trn_topo_cnt: self.op_trn_topo_cnt,
        };
        let mut frame = Frame::new(data_size);
        frame.init_header(
            MsgType::Pd,
            com_id,
            self.etb_topo_cnt,
            self.op_trn_topo_cnt,
            data_size as u32,
            0,
            Ipv4Addr::UNSPECIFIED,
        );
        let mut elem = PdElement::new(addr, interval, flags, frame, 0);
        elem.socket_idx = Some(socket_idx);
        elem.time_to_go = interval.map(|iv| now + iv);
        if flags.contains(PktFlags::CALLBACK) {
            elem.callback = self.callback.clone();
        }

        let marshaller = self.marshaller.clone();
        if data.is_some() {
            elem.put(marshaller.as_deref(), data)?;
        }

        let id = self.arena.insert(elem);
        self.snd_queue.push(id);
        self.stats.num_pub += 1;
        log::debug!("[PD] published comId {} -> {}", com_id, dest_ip);

        if self.options.traffic_shaping {
            self.distribute();
        }
        Ok(PubHandle(id))
    }

    /// Withdraw a publisher.
    pub fn unpublish(&mut self, handle: PubHandle) -> Result<()> {
        let elem = self.arena.remove(handle.0).ok_or(PdError::NoInit)?;
        queue::unlink(&mut self.snd_queue, handle.0);
        if let Some(idx) = elem.socket_idx {
            self.transport.release(idx);
        }
        self.stats.num_pub = self.stats.num_pub.saturating_sub(1);
        if self.options.traffic_shaping {
            self.distribute();
        }
        Ok(())
    }

    /// Update a publisher's payload.
    pub fn put(&mut self, handle: PubHandle, data: Option<&[u8]>) -> Result<()> {
        let marshaller = self.marshaller.clone();
        let elem = self.arena.get_mut(handle.0).ok_or(PdError::NoInit)?;
        elem.put(marshaller.as_deref(), data)
    }

    /// Leader/follower switch for REDUNDANT-flagged publishers. A follower's
    /// telegrams are silently suppressed.
    pub fn set_redundant(&mut self, leader: bool) {
        for id in self.snd_queue.clone() {
            if let Some(elem) = self.arena.get_mut(id) {
                if elem.pkt_flags.contains(PktFlags::REDUNDANT) {
                    if leader {
                        elem.clear_priv(PrivFlags::QUIET);
                    } else {
                        elem.set_priv(PrivFlags::QUIET);
                    }
                }
            }
        }
    }

    // ========================================================================
    // Subscriber side
    // ========================================================================

    /// Subscribe to a ComID.
    ///
    /// `src_filter` limits acceptance to one sender; `dest_ip` names the
    /// multicast group to join, or the expected unicast delivery address.
    /// `timeout` arms the reception watchdog (`None` = session default).
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        &mut self,
        com_id: u32,
        src_filter: Option<Ipv4Addr>,
        dest_ip: Ipv4Addr,
        timeout: Option<Duration>,
        flags: PktFlags,
        user_ref: u32,
        now: Instant,
    ) -> Result<SubHandle> {
        if com_id == 0 {
            return Err(PdError::Param);
        }

        let group = dest_ip.is_multicast().then_some(dest_ip);
        let socket_idx = self.transport.request(self.config.port, group)?;
        let interval = timeout.unwrap_or(self.config.timeout);
        let addr = AddressSpec {
            com_id,
            src_ip: src_filter.unwrap_or(Ipv4Addr::UNSPECIFIED),
            dest_ip,
            etb_topo_cnt: self.etb_topo_cnt,
            op_trn_topo_cnt: self.op_trn_topo_cnt,
        };
        let mut elem = PdElement::new(addr, Some(interval), flags, Frame::max(), 0);
        elem.socket_idx = Some(socket_idx);
        elem.time_to_go = Some(now + interval);
        elem.user_ref = user_ref;
        if flags.contains(PktFlags::CALLBACK) {
            elem.callback = self.callback.clone();
        }

        let id = self.arena.insert(elem);
        self.rcv_queue.push(id);
        self.stats.num_subs += 1;
        log::debug!("[PD] subscribed comId {} on {}", com_id, dest_ip);
        Ok(SubHandle(id))
    }

    /// Withdraw a subscription.
    pub fn unsubscribe(&mut self, handle: SubHandle) -> Result<()> {
        let elem = self.arena.remove(handle.0).ok_or(PdError::NoInit)?;
        queue::unlink(&mut self.rcv_queue, handle.0);
        if let Some(idx) = elem.socket_idx {
            self.transport.release(idx);
        }
        self.stats.num_subs = self.stats.num_subs.saturating_sub(1);
        Ok(())
    }

    /// Fetch a subscriber's last valid payload.
    pub fn get(&mut self, handle: SubHandle, out: &mut [u8]) -> Result<usize> {
        let marshaller = self.marshaller.clone();
        let elem = self.arena.get_mut(handle.0).ok_or(PdError::NoInit)?;
        elem.get(marshaller.as_deref(), out)
    }

    // ========================================================================
    // PULL
    // ========================================================================

    /// Send a one-shot pull request.
    ///
    /// The remote publisher of `reply_com_id` (or of `com_id` when
    /// `reply_com_id` is 0) answers once with a PP telegram to `reply_ip`.
    /// The request element exists only until its single emission.
    pub fn request(
        &mut self,
        com_id: u32,
        dest_ip: Ipv4Addr,
        reply_com_id: u32,
        reply_ip: Ipv4Addr,
    ) -> Result<()> {
        if com_id == 0 || dest_ip.is_unspecified() {
            return Err(PdError::Param);
        }

        let socket_idx = self.transport.request(self.config.port, None)?;
        let addr = AddressSpec {
            com_id,
            src_ip: self.own_ip,
            dest_ip,
            etb_topo_cnt: self.etb_topo_cnt,
            op_trn_topo_cnt: self.op_trn_topo_cnt,
        };
        let mut frame = Frame::new(0);
        frame.init_header(
            MsgType::Pr,
            com_id,
            self.etb_topo_cnt,
            self.op_trn_topo_cnt,
            0,
            reply_com_id,
            reply_ip,
        );
        let mut elem = PdElement::new(addr, None, PktFlags::NONE, frame, 0);
        elem.socket_idx = Some(socket_idx);
        elem.clear_priv(PrivFlags::INVALID_DATA);
        elem.set_priv(PrivFlags::REQ_2B_SENT);

        let id = self.arena.insert(elem);
        self.snd_queue.push(id);
        log::debug!(
            "[PD] pull request comId {} -> {} (reply {} on {})",
            com_id,
            dest_ip,
            reply_com_id,
            reply_ip
        );
        Ok(())
    }

    // ========================================================================
    // Work loop
    // ========================================================================

    /// Compute the bounded wait until the next due job and the sockets the
    /// loop must watch.
    pub fn get_interval(&mut self, now: Instant) -> (Duration, Vec<usize>) {
        let (_, watch) = self.check_pending();
        let wait = self.next_job.map_or(MAX_PROCESS_WAIT, |t| {
            t.saturating_duration_since(now).min(MAX_PROCESS_WAIT)
        });
        (wait, watch)
    }

    /// One engine turn: emit due telegrams, drain ready sockets, detect
    /// timeouts. Quiet receive classifications (no subscription, socket
    /// drained, no data) are not surfaced.
    pub fn process(&mut self, ready: &[usize], now: Instant) -> Result<()> {
        let mut result = Ok(());
        if let Err(err) = self.send_due(now) {
            result = Err(err);
        }
        match self.check_listen_socks(ready, now) {
            Ok(()) | Err(PdError::Block) | Err(PdError::NoSub) | Err(PdError::NoData) => {}
            Err(err) => result = Err(err),
        }
        self.handle_timeouts(now);
        result
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Snapshot the session state for the statistics telegram.
    pub fn statistics(&self, now: Instant) -> StatsSnapshot {
        StatsSnapshot {
            version: ENGINE_VERSION,
            up_time_s: now.duration_since(self.started).as_secs() as u32,
            stats_time_s: now.duration_since(self.stats_reset).as_secs() as u32,
            own_ip: self.own_ip,
            def_qos: u32::from(self.config.qos),
            def_ttl: u32::from(self.config.ttl),
            def_timeout_us: self.config.timeout.as_micros() as u32,
            pd: self.stats.into(),
        }
    }

    /// Reset the aggregate counters (upTime keeps running).
    pub fn reset_statistics(&mut self, now: Instant) {
        self.stats = PdStats {
            num_subs: self.stats.num_subs,
            num_pub: self.stats.num_pub,
            ..PdStats::default()
        };
        self.stats_reset = now;
    }

    /// Load the current statistics snapshot into the pulled reply element.
    pub(crate) fn prepare_stats(&mut self, id: ElemId, now: Instant) -> Result<()> {
        let snapshot = self.statistics(now);
        let mut buf = [0u8; StatsSnapshot::WIRE_SIZE];
        snapshot.encode(&mut buf)?;
        let elem = self.arena.get_mut(id).ok_or(PdError::NoInit)?;
        elem.put(None, Some(&buf))
    }
}

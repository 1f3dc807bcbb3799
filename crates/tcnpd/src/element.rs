// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint element: the per-publisher / per-subscriber record.
//!
//! One [`PdElement`] exists per published or subscribed ComID. Publishers live
//! in the session's send queue, subscribers in the receive queue; both are
//! mutated only by the engine's single worker thread.

use crate::config::MAX_PD_DATA_SIZE;
use crate::error::{PdError, Result};
use crate::seqtrack::SeqTracker;
use crate::wire::{Frame, MsgType};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Flags
// ============================================================================

/// Public packet flags, chosen by the application at publish/subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PktFlags(pub u8);

impl PktFlags {
    /// No options
    pub const NONE: Self = Self(0);

    /// Member of a redundancy group; emission follows the leader state
    pub const REDUNDANT: Self = Self(0x01);

    /// Run payloads through the session marshaller
    pub const MARSHALL: Self = Self(0x02);

    /// Deliver received telegrams through the callback
    pub const CALLBACK: Self = Self(0x04);

    /// Callback on every received telegram, not only on data change
    pub const FORCE_CB: Self = Self(0x08);

    /// Check if a flag is set
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Combine flags
    pub const fn with(self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }
}

/// Engine-private element state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub(crate) struct PrivFlags(u8);

impl PrivFlags {
    /// No valid payload yet; the sender must not emit this element
    pub const INVALID_DATA: Self = Self(0x01);

    /// Watchdog fired; cleared by the next accepted telegram
    pub const TIMED_OUT: Self = Self(0x02);

    /// Immediate-send trigger (pull request or pulled reply)
    pub const REQ_2B_SENT: Self = Self(0x04);

    /// Redundancy follower; emission suppressed
    pub const QUIET: Self = Self(0x08);

    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    pub fn insert(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: Self) {
        self.0 &= !flag.0;
    }
}

// ============================================================================
// Addressing
// ============================================================================

/// Address tuple of an endpoint element.
///
/// Subscription matching keys on ComID + destination (the multicast group
/// when applicable) + the optional source filter. The topology counters are
/// validated on reception, not keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpec {
    /// ComID of the telegram
    pub com_id: u32,
    /// Source filter (subscribers) or own address (publishers);
    /// `UNSPECIFIED` accepts any source
    pub src_ip: Ipv4Addr,
    /// Destination address, or joined multicast group for subscribers
    pub dest_ip: Ipv4Addr,
    /// ETB topology counter stored at registration (0 = wildcard)
    pub etb_topo_cnt: u32,
    /// Operational train topology counter stored at registration (0 = wildcard)
    pub op_trn_topo_cnt: u32,
}

// ============================================================================
// Callback surface
// ============================================================================

/// Telegram info handed to the application callback.
#[derive(Debug, Clone, Copy)]
pub struct PdInfo {
    /// ComID of the telegram
    pub com_id: u32,
    /// Source address of the telegram (last sender for subscribers)
    pub src_ip: Ipv4Addr,
    /// Destination the telegram was delivered to
    pub dest_ip: Ipv4Addr,
    /// ETB topology counter from the frame
    pub etb_topo_cnt: u32,
    /// Operational train topology counter from the frame
    pub op_trn_topo_cnt: u32,
    /// Message type from the frame
    pub msg_type: MsgType,
    /// Sequence counter from the frame
    pub seq_count: u32,
    /// Protocol version from the frame
    pub protocol_version: u16,
    /// Reply ComID (pull requests only)
    pub reply_com_id: u32,
    /// Reply address (pull requests only)
    pub reply_ip: Ipv4Addr,
    /// User reference given at subscribe time
    pub user_ref: u32,
    /// `None` on success, the classification otherwise
    pub result_code: Option<PdError>,
}

/// Application callback invoked with telegram info and payload.
///
/// Callbacks run on the engine's worker thread and must not block. Their
/// return is ignored.
pub type PdCallback = Arc<dyn Fn(&PdInfo, &[u8]) + Send + Sync>;

/// Application-level payload (un)marshalling hooks.
///
/// `marshall` may shrink the payload; both return the treated size.
pub trait Marshaller {
    /// Transform an application dataset into wire form.
    fn marshall(&self, com_id: u32, src: &[u8], dst: &mut [u8]) -> Result<usize>;
    /// Transform a wire dataset into application form.
    fn unmarshall(&self, com_id: u32, src: &[u8], dst: &mut [u8]) -> Result<usize>;
}

/// Marshaller handle shared between the session and its endpoints.
pub type SharedMarshaller = Arc<dyn Marshaller + Send + Sync>;

/// Borrowed marshaller as passed into the payload operations.
pub type MarshallerRef<'a> = &'a (dyn Marshaller + Send + Sync);

// ============================================================================
// Element
// ============================================================================

/// Per-element traffic counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElemStats {
    /// Payload updates via put
    pub upd_pkts: u32,
    /// Payload fetches via get
    pub get_pkts: u32,
    /// Telegrams sent (publisher) or accepted (subscriber)
    pub num_rx_tx: u32,
    /// Sequence gaps accumulated on the receive side
    pub num_missed: u32,
}

/// One published or subscribed PD endpoint.
#[derive(Clone)]
pub struct PdElement {
    /// Addressing of this endpoint
    pub addr: AddressSpec,
    /// One-shot destination override for the next send (pull replies)
    pub pull_ip: Ipv4Addr,
    /// Send cycle (publishers) or watchdog period (subscribers);
    /// `None` = pull-only / one-shot
    pub interval: Option<Duration>,
    /// Absolute next due time (send deadline or watchdog expiry)
    pub time_to_go: Option<Instant>,
    /// Public flags
    pub pkt_flags: PktFlags,
    pub(crate) priv_flags: PrivFlags,
    /// Owned frame buffer in wire form
    pub frame: Frame,
    /// Current payload size, excluding padding
    pub data_size: usize,
    /// Outgoing PD / last accepted incoming sequence counter
    pub cur_seq_cnt: u32,
    /// Outgoing PP sequence counter, tracked separately
    pub cur_seq_cnt_pull: u32,
    /// Per-source last-seen sequence counters (subscribers)
    pub seq_track: SeqTracker,
    /// Traffic counters
    pub stats: ElemStats,
    /// Last receive-path classification for this element
    pub last_err: Option<PdError>,
    /// Source address of the last accepted telegram
    pub last_src_ip: Ipv4Addr,
    /// Index into the transport's socket table; `None` if not bound
    pub socket_idx: Option<usize>,
    /// Application callback
    pub callback: Option<PdCallback>,
    /// Opaque reference echoed in [`PdInfo`]
    pub user_ref: u32,
}

impl PdElement {
    pub(crate) fn new(
        addr: AddressSpec,
        interval: Option<Duration>,
        pkt_flags: PktFlags,
        frame: Frame,
        data_size: usize,
    ) -> Self {
        let mut priv_flags = PrivFlags::default();
        priv_flags.insert(PrivFlags::INVALID_DATA);
        Self {
            addr,
            pull_ip: Ipv4Addr::UNSPECIFIED,
            interval,
            time_to_go: None,
            pkt_flags,
            priv_flags,
            frame,
            data_size,
            cur_seq_cnt: 0,
            cur_seq_cnt_pull: 0,
            seq_track: SeqTracker::new(),
            stats: ElemStats::default(),
            last_err: None,
            last_src_ip: Ipv4Addr::UNSPECIFIED,
            socket_idx: None,
            callback: None,
            user_ref: 0,
        }
    }

    /// Wire size of this element's telegram.
    pub fn gross_size(&self) -> usize {
        crate::wire::frame::gross_size(self.data_size)
    }

    pub(crate) fn has_priv(&self, flag: PrivFlags) -> bool {
        self.priv_flags.contains(flag)
    }

    pub(crate) fn set_priv(&mut self, flag: PrivFlags) {
        self.priv_flags.insert(flag);
    }

    pub(crate) fn clear_priv(&mut self, flag: PrivFlags) {
        self.priv_flags.remove(flag);
    }

    /// Advance the outgoing sequence counter, stamp it into the header and
    /// re-seal the FCS. PP emissions count on their own counter.
    pub(crate) fn update_outgoing(&mut self) {
        let seq = if self.frame.msg_type() == Some(MsgType::Pp) {
            self.cur_seq_cnt_pull = self.cur_seq_cnt_pull.wrapping_add(1);
            self.cur_seq_cnt_pull
        } else {
            self.cur_seq_cnt = self.cur_seq_cnt.wrapping_add(1);
            self.cur_seq_cnt
        };
        self.frame.set_sequence(seq);
        self.frame.seal();
    }

    /// Update the payload to be sent.
    ///
    /// `data = None` (or an empty slice) on an element that never carried data
    /// marks the telegram valid without payload, so publishers without data
    /// still emit. Otherwise the payload is copied (or marshalled, which may
    /// shrink it) into the frame and the header's dataset length is updated.
    pub fn put(&mut self, marshaller: Option<MarshallerRef<'_>>, data: Option<&[u8]>) -> Result<()> {
        let size = data.map_or(0, <[u8]>::len);

        if self.data_size == 0 && size == 0 {
            // A valid no-data telegram: start sending.
            self.clear_priv(PrivFlags::INVALID_DATA);
            self.stats.upd_pkts += 1;
            return Ok(());
        }

        let Some(data) = data else { return Ok(()) };
        if size == 0 {
            return Ok(());
        }
        if size > MAX_PD_DATA_SIZE {
            return Err(PdError::Param);
        }

        // Late data: the buffer may have been allocated for an empty telegram.
        self.frame.grow(size);

        if !self.pkt_flags.contains(PktFlags::MARSHALL) || marshaller.is_none() {
            self.frame.data_mut(size).copy_from_slice(data);
            self.data_size = size;
        } else {
            let marshaller = marshaller.ok_or(PdError::Param)?;
            let treated = marshaller.marshall(self.addr.com_id, data, self.frame.data_mut(size))?;
            if treated > MAX_PD_DATA_SIZE {
                return Err(PdError::Param);
            }
            self.data_size = treated;
        }
        self.frame.set_dataset_length(self.data_size as u32);

        self.clear_priv(PrivFlags::INVALID_DATA);
        self.stats.upd_pkts += 1;
        Ok(())
    }

    /// Copy (or unmarshall) the last valid payload out.
    ///
    /// Returns the payload size placed into `out`.
    pub fn get(&mut self, marshaller: Option<MarshallerRef<'_>>, out: &mut [u8]) -> Result<usize> {
        self.stats.get_pkts += 1;

        if self.has_priv(PrivFlags::INVALID_DATA) {
            return Err(PdError::NoData);
        }
        if self.has_priv(PrivFlags::TIMED_OUT) {
            return Err(PdError::Timeout);
        }

        if !self.pkt_flags.contains(PktFlags::MARSHALL) || marshaller.is_none() {
            if out.len() < self.data_size {
                return Err(PdError::Param);
            }
            out[..self.data_size].copy_from_slice(self.frame.data(self.data_size));
            Ok(self.data_size)
        } else {
            let marshaller = marshaller.ok_or(PdError::Param)?;
            let wire_len = self.frame.dataset_length() as usize;
            marshaller.unmarshall(self.addr.com_id, self.frame.data(wire_len), out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(data_size: usize) -> PdElement {
        let addr = AddressSpec {
            com_id: 1000,
            src_ip: Ipv4Addr::new(10, 0, 0, 1),
            dest_ip: Ipv4Addr::new(10, 0, 0, 2),
            etb_topo_cnt: 0,
            op_trn_topo_cnt: 0,
        };
        let mut frame = Frame::new(data_size);
        frame.init_header(
            MsgType::Pd,
            addr.com_id,
            0,
            0,
            data_size as u32,
            0,
            Ipv4Addr::UNSPECIFIED,
        );
        PdElement::new(
            addr,
            Some(Duration::from_millis(100)),
            PktFlags::NONE,
            frame,
            data_size,
        )
    }

    #[test]
    fn test_put_get_round_trip() {
        let mut elt = publisher(8);
        elt.put(None, Some(&[1, 2, 3, 4, 5, 6, 7, 8])).unwrap();

        let mut out = [0u8; 8];
        let n = elt.get(None, &mut out).unwrap();
        assert_eq!(n, 8);
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_put_without_data_validates_element() {
        let mut elt = publisher(0);
        assert!(elt.has_priv(PrivFlags::INVALID_DATA));
        elt.put(None, None).unwrap();
        assert!(!elt.has_priv(PrivFlags::INVALID_DATA));
        assert_eq!(elt.stats.upd_pkts, 1);
    }

    #[test]
    fn test_put_late_data_grows_buffer() {
        let mut elt = publisher(0);
        elt.put(None, Some(&[9u8; 16])).unwrap();
        assert_eq!(elt.data_size, 16);
        assert_eq!(elt.frame.dataset_length(), 16);
        assert_eq!(elt.frame.data(16), &[9u8; 16]);
    }

    #[test]
    fn test_put_oversize_rejected() {
        let mut elt = publisher(0);
        let big = vec![0u8; MAX_PD_DATA_SIZE + 1];
        assert_eq!(elt.put(None, Some(&big)), Err(PdError::Param));
    }

    #[test]
    fn test_get_before_put_is_no_data() {
        let mut elt = publisher(4);
        let mut out = [0u8; 4];
        assert_eq!(elt.get(None, &mut out), Err(PdError::NoData));
    }

    #[test]
    fn test_get_after_timeout_reports_timeout() {
        let mut elt = publisher(4);
        elt.put(None, Some(&[1, 2, 3, 4])).unwrap();
        elt.set_priv(PrivFlags::TIMED_OUT);
        let mut out = [0u8; 4];
        assert_eq!(elt.get(None, &mut out), Err(PdError::Timeout));
    }

    #[test]
    fn test_update_outgoing_separates_pull_counter() {
        let mut elt = publisher(0);
        elt.update_outgoing();
        elt.update_outgoing();
        assert_eq!(elt.cur_seq_cnt, 2);
        assert_eq!(elt.cur_seq_cnt_pull, 0);

        elt.frame.set_msg_type(MsgType::Pp);
        elt.update_outgoing();
        assert_eq!(elt.cur_seq_cnt, 2);
        assert_eq!(elt.cur_seq_cnt_pull, 1);
        assert_eq!(elt.frame.header().unwrap().sequence_counter, 1);
    }

    struct Halver;
    impl Marshaller for Halver {
        fn marshall(&self, _com_id: u32, src: &[u8], dst: &mut [u8]) -> Result<usize> {
            // Treated form drops every second octet.
            let n = src.len() / 2;
            for i in 0..n {
                dst[i] = src[2 * i];
            }
            Ok(n)
        }
        fn unmarshall(&self, _com_id: u32, src: &[u8], dst: &mut [u8]) -> Result<usize> {
            dst[..src.len()].copy_from_slice(src);
            Ok(src.len())
        }
    }

    #[test]
    fn test_put_marshalled_may_shrink() {
        let mut elt = publisher(0);
        elt.pkt_flags = PktFlags::MARSHALL;
        elt.put(Some(&Halver), Some(&[1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
        assert_eq!(elt.data_size, 4);
        assert_eq!(elt.frame.dataset_length(), 4);
        assert_eq!(elt.frame.data(4), &[1, 3, 5, 7]);
    }
}

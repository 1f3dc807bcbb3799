// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session statistics and the statistics telegram payload.
//!
//! The session keeps aggregate PD counters; a snapshot of them is the payload
//! of the GLOBAL_STATISTICS pull reply, encoded as consecutive u32 fields in
//! network byte order.

use crate::error::{PdError, Result};
use crate::wire::{read_u32, write_u32};
use std::net::Ipv4Addr;

/// Aggregate PD counters of one session.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdStats {
    /// Subscribed ComIDs
    pub num_subs: u32,
    /// Published ComIDs
    pub num_pub: u32,
    /// Received PD telegrams
    pub num_rcv: u32,
    /// Received telegrams with FCS mismatch
    pub num_crc_err: u32,
    /// Received telegrams with protocol errors
    pub num_prot_err: u32,
    /// Received telegrams with topology counter mismatch
    pub num_topo_err: u32,
    /// Received telegrams without a matching subscription
    pub num_no_subs: u32,
    /// Pull requests without a matching publisher
    pub num_no_pub: u32,
    /// Subscription timeouts
    pub num_timeout: u32,
    /// Sent PD telegrams
    pub num_send: u32,
}

/// Snapshot of a session's state as carried by the statistics telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Engine version (major << 24 | minor << 16 | patch << 8)
    pub version: u32,
    /// Seconds since session creation
    pub up_time_s: u32,
    /// Seconds since the statistics were last reset
    pub stats_time_s: u32,
    /// Own IP address of the answering session
    pub own_ip: Ipv4Addr,
    /// Default quality of service class
    pub def_qos: u32,
    /// Default time-to-live
    pub def_ttl: u32,
    /// Default subscription timeout in microseconds
    pub def_timeout_us: u32,
    /// PD counters
    pub pd: PdStatsView,
}

/// PD counter block of the snapshot (same order as [`PdStats`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PdStatsView {
    /// Subscribed ComIDs
    pub num_subs: u32,
    /// Published ComIDs
    pub num_pub: u32,
    /// Received PD telegrams
    pub num_rcv: u32,
    /// Received telegrams with FCS mismatch
    pub num_crc_err: u32,
    /// Received telegrams with protocol errors
    pub num_prot_err: u32,
    /// Received telegrams with topology counter mismatch
    pub num_topo_err: u32,
    /// Received telegrams without a matching subscription
    pub num_no_subs: u32,
    /// Pull requests without a matching publisher
    pub num_no_pub: u32,
    /// Subscription timeouts
    pub num_timeout: u32,
    /// Sent PD telegrams
    pub num_send: u32,
}

impl From<PdStats> for PdStatsView {
    fn from(s: PdStats) -> Self {
        Self {
            num_subs: s.num_subs,
            num_pub: s.num_pub,
            num_rcv: s.num_rcv,
            num_crc_err: s.num_crc_err,
            num_prot_err: s.num_prot_err,
            num_topo_err: s.num_topo_err,
            num_no_subs: s.num_no_subs,
            num_no_pub: s.num_no_pub,
            num_timeout: s.num_timeout,
            num_send: s.num_send,
        }
    }
}

impl StatsSnapshot {
    /// Wire size of the snapshot: 17 consecutive u32 fields.
    pub const WIRE_SIZE: usize = 17 * 4;

    /// Encode in network byte order. Returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(PdError::Param);
        }
        let fields = [
            self.version,
            self.up_time_s,
            self.stats_time_s,
            u32::from(self.own_ip),
            self.def_qos,
            self.def_ttl,
            self.def_timeout_us,
            self.pd.num_subs,
            self.pd.num_pub,
            self.pd.num_rcv,
            self.pd.num_crc_err,
            self.pd.num_prot_err,
            self.pd.num_topo_err,
            self.pd.num_no_subs,
            self.pd.num_no_pub,
            self.pd.num_timeout,
            self.pd.num_send,
        ];
        for (i, value) in fields.iter().enumerate() {
            write_u32(buf, i * 4, *value);
        }
        Ok(Self::WIRE_SIZE)
    }

    /// Decode from network byte order.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(PdError::Param);
        }
        let field = |i: usize| read_u32(buf, i * 4);
        Ok(Self {
            version: field(0),
            up_time_s: field(1),
            stats_time_s: field(2),
            own_ip: Ipv4Addr::from(field(3)),
            def_qos: field(4),
            def_ttl: field(5),
            def_timeout_us: field(6),
            pd: PdStatsView {
                num_subs: field(7),
                num_pub: field(8),
                num_rcv: field(9),
                num_crc_err: field(10),
                num_prot_err: field(11),
                num_topo_err: field(12),
                num_no_subs: field(13),
                num_no_pub: field(14),
                num_timeout: field(15),
                num_send: field(16),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = StatsSnapshot {
            version: 0x00020000,
            up_time_s: 120,
            stats_time_s: 120,
            own_ip: Ipv4Addr::new(10, 0, 0, 5),
            def_qos: 5,
            def_ttl: 64,
            def_timeout_us: 10_000_000,
            pd: PdStatsView {
                num_subs: 1,
                num_pub: 2,
                num_rcv: 300,
                num_crc_err: 1,
                num_prot_err: 0,
                num_topo_err: 2,
                num_no_subs: 4,
                num_no_pub: 0,
                num_timeout: 1,
                num_send: 299,
            },
        };

        let mut buf = [0u8; StatsSnapshot::WIRE_SIZE];
        assert_eq!(snapshot.encode(&mut buf).unwrap(), StatsSnapshot::WIRE_SIZE);
        assert_eq!(StatsSnapshot::decode(&buf).unwrap(), snapshot);

        // Network byte order: first field big-endian.
        assert_eq!(
            u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            0x00020000
        );
    }

    #[test]
    fn test_short_buffer_rejected() {
        let buf = [0u8; StatsSnapshot::WIRE_SIZE - 1];
        assert_eq!(StatsSnapshot::decode(&buf), Err(PdError::Param));
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol constants and session configuration - single source of truth.
//!
//! Every wire-level constant of the PD protocol lives here. **Never hardcode
//! these values elsewhere!**

use crate::element::PktFlags;
use std::time::Duration;

// =======================================================================
// PD wire constants (IEC 61375-2-3)
// =======================================================================

/// PD protocol version carried in every header (major.minor = 1.0).
pub const PROTOCOL_VERSION: u16 = 0x0100;

/// Mask for the protocol version compare: only the major version must match.
pub const PROTOCOL_VERSION_MASK: u16 = 0xFF00;

/// Fixed PD header size in octets, including the trailing FCS field.
pub const PD_HEADER_SIZE: usize = 40;

/// Size of the frame check sum field at the end of the header.
pub const FCS_SIZE: usize = 4;

/// Maximum PD payload per telegram in octets.
pub const MAX_PD_DATA_SIZE: usize = 1432;

/// Maximum PD packet size on the wire (header + max payload).
pub const MAX_PD_PACKET_SIZE: usize = PD_HEADER_SIZE + MAX_PD_DATA_SIZE;

/// Smallest valid PD packet: a bare header.
pub const MIN_PD_PACKET_SIZE: usize = PD_HEADER_SIZE;

/// IANA-registered UDP port for PD traffic.
pub const DEFAULT_PD_PORT: u16 = 17224;

// =======================================================================
// Distinguished ComIDs (61375 errata values)
// =======================================================================

/// ComID of the statistics PULL request telegram.
pub const STATISTICS_REQUEST_COMID: u32 = 31;

/// ComID of the global statistics reply telegram (and its subscription).
pub const GLOBAL_STATISTICS_COMID: u32 = 35;

// =======================================================================
// Engine limits
// =======================================================================

/// Per-subscriber cap on tracked (source IP, message type) sequence entries.
pub const SEQ_TRACK_MAX_SOURCES: usize = 64;

/// Upper bound for the work-loop wait so new registrations become visible.
pub const MAX_PROCESS_WAIT: Duration = Duration::from_secs(5);

// =======================================================================
// Runtime configuration
// =======================================================================

/// Default parameters applied to PD endpoints created by a session.
#[derive(Debug, Clone)]
pub struct PdConfig {
    /// UDP port used for PD send and receive.
    pub port: u16,
    /// Default subscription timeout when the caller passes none.
    pub timeout: Duration,
    /// Default packet flags for publish/subscribe.
    pub flags: PktFlags,
    /// Default quality of service class (DSCP-style code point).
    pub qos: u8,
    /// Default time-to-live for sent telegrams.
    pub ttl: u8,
}

impl Default for PdConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PD_PORT,
            timeout: Duration::from_secs(10),
            flags: PktFlags::NONE,
            qos: 5,
            ttl: 64,
        }
    }
}

/// Session-wide behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Blocking receive: drain exactly one frame per ready socket instead of
    /// looping until the socket is dry.
    pub blocking: bool,
    /// Respace publisher send times after each publisher-set change.
    pub traffic_shaping: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_size_bounds() {
        assert_eq!(MAX_PD_PACKET_SIZE, 1472);
        assert_eq!(MIN_PD_PACKET_SIZE, PD_HEADER_SIZE);
    }

    #[test]
    fn test_default_config() {
        let cfg = PdConfig::default();
        assert_eq!(cfg.port, DEFAULT_PD_PORT);
        assert!(cfg.timeout > Duration::ZERO);
    }
}

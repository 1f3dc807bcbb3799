// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the PD engine.

use std::fmt;

/// Result type for PD engine operations.
pub type Result<T> = std::result::Result<T, PdError>;

/// Error classification for the PD engine.
///
/// Receive-path classifications (`Wire`, `Crc`, `Topo`, `NoSub`) are counted
/// in the session statistics and returned, never fatal; send-path errors are
/// reported while iteration continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdError {
    /// Parameter missing or out of range
    Param,

    /// Allocation failed or a bounded table overflowed
    Mem,

    /// Malformed header (bad size, protocol version or message type)
    Wire,

    /// Header frame check sum mismatch
    Crc,

    /// Topology counter mismatch
    Topo,

    /// Valid frame but no matching subscriber
    NoSub,

    /// PULL request without a matching publisher
    NoPub,

    /// No valid data received/put yet
    NoData,

    /// Subscription watchdog expired
    Timeout,

    /// Transport send/receive failed
    Io,

    /// Nonblocking socket drained
    Block,

    /// Operation on an unknown or stale endpoint handle
    NoInit,
}

impl fmt::Display for PdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdError::Param => write!(f, "Parameter missing or out of range"),
            PdError::Mem => write!(f, "Out of memory or table overflow"),
            PdError::Wire => write!(f, "Malformed PD header"),
            PdError::Crc => write!(f, "Header checksum mismatch"),
            PdError::Topo => write!(f, "Topology counter mismatch"),
            PdError::NoSub => write!(f, "No matching subscriber"),
            PdError::NoPub => write!(f, "No matching publisher"),
            PdError::NoData => write!(f, "No valid data"),
            PdError::Timeout => write!(f, "Subscription timed out"),
            PdError::Io => write!(f, "Transport I/O error"),
            PdError::Block => write!(f, "Socket drained"),
            PdError::NoInit => write!(f, "Unknown or stale endpoint handle"),
        }
    }
}

impl std::error::Error for PdError {}

impl From<std::io::Error> for PdError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::WouldBlock {
            PdError::Block
        } else {
            PdError::Io
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_total() {
        // Every variant renders without panicking.
        let all = [
            PdError::Param,
            PdError::Mem,
            PdError::Wire,
            PdError::Crc,
            PdError::Topo,
            PdError::NoSub,
            PdError::NoPub,
            PdError::NoData,
            PdError::Timeout,
            PdError::Io,
            PdError::Block,
            PdError::NoInit,
        ];
        for err in all {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn test_would_block_maps_to_block() {
        let io = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert_eq!(PdError::from(io), PdError::Block);
    }
}

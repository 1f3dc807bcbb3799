// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # TCNPD - TCN Process Data engine
//!
//! A pure Rust implementation of the process-data (PD) part of the train
//! communication network protocol family (IEC 61375): cyclic best-effort UDP
//! telegrams with fixed headers, sequence-counter discipline, topology
//! gating, reception watchdogs and the one-shot PULL request/reply exchange.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::Ipv4Addr;
//! use std::time::{Duration, Instant};
//! use tcnpd::{PdConfig, PdSession, PktFlags, SessionOptions, UdpTransport};
//!
//! fn main() -> tcnpd::Result<()> {
//!     let own_ip = Ipv4Addr::new(10, 0, 0, 1);
//!     let transport = UdpTransport::new(own_ip, 64).map_err(|_| tcnpd::PdError::Io)?;
//!     let mut session = PdSession::new(
//!         transport,
//!         own_ip,
//!         PdConfig::default(),
//!         SessionOptions::default(),
//!         None,
//!         Instant::now(),
//!     )?;
//!
//!     // Publish a cyclic telegram
//!     let handle = session.publish(
//!         1000,
//!         Ipv4Addr::new(10, 0, 0, 2),
//!         Some(Duration::from_millis(100)),
//!         PktFlags::NONE,
//!         Some(b"hello"),
//!         Instant::now(),
//!     )?;
//!
//!     loop {
//!         let now = Instant::now();
//!         let (wait, _watch) = session.get_interval(now);
//!         let ready = session.transport_mut().wait(wait).unwrap_or_default();
//!         let _ = session.process(&ready, Instant::now());
//!         let _ = handle;
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------+
//! |  Application (publish/subscribe/put/get)      |
//! +-----------------------------------------------+
//! |  PdSession: queues, statistics, scratch frame |
//! +-----------------------------------------------+
//! |  Engine: send_due | receive | handle_timeouts |
//! |          check_pending | distribute           |
//! +-----------------------------------------------+
//! |  Wire codec (header, FCS) | Endpoint elements |
//! +-----------------------------------------------+
//! |  Transport (UDP unicast/multicast, mio poll)  |
//! +-----------------------------------------------+
//! ```
//!
//! The engine is single-threaded and cooperative: all state is mutated from
//! the application's work thread through the process entry points, and
//! callbacks run on that same thread.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Protocol constants and session configuration.
pub mod config;
/// Endpoint elements (per-publisher / per-subscriber records).
pub mod element;
/// Process entry points (sender, receiver, scanners, shaper).
pub mod engine;
/// Error types.
pub mod error;
/// Element arena and queue search helpers.
pub mod queue;
/// Per-source sequence counter tracking.
pub mod seqtrack;
/// The PD session and its application surface.
pub mod session;
/// Session statistics and the statistics telegram payload.
pub mod stats;
/// Transport abstraction (UDP and in-memory test transport).
pub mod transport;
/// PD header codec and frame buffers.
pub mod wire;

// Re-exports for convenience
pub use config::{PdConfig, SessionOptions};
pub use config::{
    DEFAULT_PD_PORT, GLOBAL_STATISTICS_COMID, MAX_PD_DATA_SIZE, MAX_PD_PACKET_SIZE,
    STATISTICS_REQUEST_COMID,
};
pub use element::{ElemStats, Marshaller, PdCallback, PdInfo, PktFlags, SharedMarshaller};
pub use error::{PdError, Result};
pub use session::{PdSession, PubHandle, SubHandle};
pub use stats::StatsSnapshot;
pub use transport::{MemTransport, Transport, UdpTransport};
pub use wire::MsgType;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

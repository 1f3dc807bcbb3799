// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process entry points of the PD engine.
//!
//! The application's work thread interleaves a blocking wait on the socket
//! set with these calls:
//!
//! ```text
//! loop {
//!     (wait, watch) = session.get_interval(now)   // check_pending
//!     ready = transport.wait(wait)                // external select/poll
//!     session.process(ready, now)                 // send_due
//!                                                 //   + check_listen_socks
//!                                                 //   + handle_timeouts
//! }
//! ```
//!
//! Each operation runs to completion; there is no yielding inside the engine.

mod distribute;
mod pending;
mod receive;
mod send;
mod timeout;

use crate::element::{PdElement, PdInfo};
use crate::error::PdError;
use crate::wire::MsgType;
use std::net::Ipv4Addr;

/// Table A.5 topology counter comparison.
///
/// A pair only conflicts when both sides are nonzero and differ; zero is a
/// wildcard.
pub(crate) fn topo_match(etb_a: u32, op_a: u32, etb_b: u32, op_b: u32) -> bool {
    if etb_a != 0 && etb_b != 0 && etb_a != etb_b {
        return false;
    }
    if op_a != 0 && op_b != 0 && op_a != op_b {
        return false;
    }
    true
}

/// Build the callback info block from an element's current frame.
///
/// Tolerates a frame that never carried a telegram (fields default to zero),
/// which happens when a timeout fires before the first reception.
pub(crate) fn pd_info_for(
    elem: &PdElement,
    dest_ip: Ipv4Addr,
    result_code: Option<PdError>,
) -> PdInfo {
    let header = elem.frame.header().ok();
    PdInfo {
        com_id: elem.addr.com_id,
        src_ip: elem.last_src_ip,
        dest_ip,
        etb_topo_cnt: header.map_or(0, |h| h.etb_topo_cnt),
        op_trn_topo_cnt: header.map_or(0, |h| h.op_trn_topo_cnt),
        msg_type: header.map_or(MsgType::Pd, |h| h.msg_type),
        seq_count: header.map_or(0, |h| h.sequence_counter),
        protocol_version: header.map_or(0, |h| h.protocol_version),
        reply_com_id: header.map_or(0, |h| h.reply_com_id),
        reply_ip: header.map_or(Ipv4Addr::UNSPECIFIED, |h| h.reply_ip),
        user_ref: elem.user_ref,
        result_code,
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sender engine: emit all due telegrams.

use crate::element::PrivFlags;
use crate::engine::{pd_info_for, topo_match};
use crate::error::{PdError, Result};
use crate::session::PdSession;
use crate::transport::Transport;
use crate::wire::MsgType;
use std::net::Ipv4Addr;
use std::time::Instant;

impl<T: Transport> PdSession<T> {
    /// Walk the send queue once and emit every element that is due: cyclic
    /// elements whose time has come, plus anything flagged for immediate
    /// sending (pull requests and pulled replies).
    ///
    /// One failing publisher never blocks the others; the last error is
    /// returned after the full pass.
    pub fn send_due(&mut self, now: Instant) -> Result<()> {
        let mut last_err = Ok(());

        for id in self.snd_queue.clone() {
            let Some(elem) = self.arena.get_mut(id) else {
                continue;
            };

            let cyclic_due =
                elem.interval.is_some() && elem.time_to_go.is_some_and(|t| t <= now);
            if !cyclic_due && !elem.has_priv(PrivFlags::REQ_2B_SENT) {
                continue;
            }

            if !elem.has_priv(PrivFlags::INVALID_DATA) {
                // A pulled cyclic publisher answers this one emission as PP.
                if elem.has_priv(PrivFlags::REQ_2B_SENT)
                    && elem.frame.msg_type() == Some(MsgType::Pd)
                {
                    elem.frame.set_msg_type(MsgType::Pp);
                }

                elem.update_outgoing();

                // Publisher check from Table A.5: session counters against
                // those stamped into the frame at registration.
                let frame_etb = elem.frame.header().map_or(0, |h| h.etb_topo_cnt);
                let frame_op = elem.frame.header().map_or(0, |h| h.op_trn_topo_cnt);
                if !topo_match(self.etb_topo_cnt, self.op_trn_topo_cnt, frame_etb, frame_op) {
                    last_err = Err(PdError::Topo);
                    log::info!("[PD] sending comId {}: topo count out of date", elem.addr.com_id);
                } else {
                    match elem.socket_idx {
                        None => {
                            // Uninitialized publisher; keep sending the others.
                            log::error!(
                                "[PD] sending comId {}: socket invalid",
                                elem.addr.com_id
                            );
                        }
                        Some(_) if elem.has_priv(PrivFlags::QUIET) => {
                            // Silent redundancy follower.
                        }
                        Some(socket) => {
                            if let Some(cb) = &elem.callback {
                                let info = pd_info_for(elem, elem.addr.dest_ip, None);
                                cb(&info, elem.frame.data(elem.data_size));
                            }

                            // A pull reply goes to the requester, once.
                            let dest = if elem.pull_ip.is_unspecified() {
                                elem.addr.dest_ip
                            } else {
                                std::mem::replace(&mut elem.pull_ip, Ipv4Addr::UNSPECIFIED)
                            };

                            let wire = elem.frame.wire_bytes(elem.data_size);
                            match self.transport.send(socket, wire, dest, self.config.port) {
                                Ok(()) => {
                                    self.stats.num_send += 1;
                                    elem.stats.num_rx_tx += 1;
                                }
                                Err(err) => {
                                    elem.last_err = Some(err);
                                    last_err = Err(err);
                                }
                            }
                        }
                    }
                }
            }

            if elem.has_priv(PrivFlags::REQ_2B_SENT)
                && elem.frame.msg_type() == Some(MsgType::Pp)
            {
                // The pull reply was extra; restore the type and leave the
                // cyclic schedule untouched.
                elem.frame.set_msg_type(MsgType::Pd);
            } else if let (Some(interval), Some(time_to_go)) = (elem.interval, elem.time_to_go) {
                let mut next = time_to_go + interval;
                if next <= now {
                    // More than one interval late: snap forward instead of
                    // catching up with a send burst.
                    next = now + interval;
                }
                elem.time_to_go = Some(next);
            }

            elem.clear_priv(PrivFlags::REQ_2B_SENT);

            // A pull request exists only until its single emission.
            if elem.frame.msg_type() == Some(MsgType::Pr) {
                let socket_idx = elem.socket_idx;
                self.arena.remove(id);
                crate::queue::unlink(&mut self.snd_queue, id);
                if let Some(idx) = socket_idx {
                    self.transport.release(idx);
                }
            }
        }

        last_err
    }
}

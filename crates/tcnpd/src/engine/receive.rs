// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver engine: parse, vet and accept one incoming telegram.

use crate::config::{GLOBAL_STATISTICS_COMID, STATISTICS_REQUEST_COMID};
use crate::element::{PktFlags, PrivFlags};
use crate::engine::{pd_info_for, topo_match};
use crate::error::{PdError, Result};
use crate::queue;
use crate::seqtrack::SeqVerdict;
use crate::session::PdSession;
use crate::transport::Transport;
use crate::wire::{self, MsgType};
use std::time::Instant;

impl<T: Transport> PdSession<T> {
    /// Read and process one telegram from `sock`.
    ///
    /// Routes pull requests to their publisher, matches subscribers, vets
    /// sequence and topology counters and swaps the validated frame into the
    /// subscriber. At most one subscriber's buffer changes per call; the
    /// dispatcher loops while the socket has more to give.
    pub fn receive(&mut self, sock: usize, now: Instant) -> Result<()> {
        // 1. Pull the telegram off the wire into the session scratch.
        let received = self.transport.recv(sock, self.scratch.as_bytes_mut())?;
        let Some(received) = received else {
            return Err(PdError::Block);
        };
        let (src_ip, dest_ip) = (received.src, received.dst);

        // 2. Is the frame sane?
        match wire::check(self.scratch.as_bytes(), received.len) {
            Ok(()) => self.stats.num_rcv += 1,
            Err(PdError::Crc) => {
                self.stats.num_crc_err += 1;
                return Err(PdError::Crc);
            }
            Err(err) => {
                self.stats.num_prot_err += 1;
                return Err(err);
            }
        }
        let header = self.scratch.header()?;

        // 3. Session-level gate: actual topology counters against the frame's.
        if !topo_match(
            self.etb_topo_cnt,
            self.op_trn_topo_cnt,
            header.etb_topo_cnt,
            header.op_trn_topo_cnt,
        ) {
            self.stats.num_topo_err += 1;
            return Err(PdError::Topo);
        }

        let mut inform_user = false;

        // 4. Pull request: trigger the matching publisher.
        if header.msg_type == MsgType::Pr {
            let pulled = if header.com_id == STATISTICS_REQUEST_COMID {
                let found =
                    queue::find_by_com_id(&self.arena, &self.snd_queue, GLOBAL_STATISTICS_COMID);
                match found {
                    Some(id) => {
                        if let Some(elem) = self.arena.get_mut(id) {
                            elem.addr.dest_ip = header.reply_ip;
                            elem.frame.init_header(
                                MsgType::Pp,
                                GLOBAL_STATISTICS_COMID,
                                self.etb_topo_cnt,
                                self.op_trn_topo_cnt,
                                0,
                                0,
                                std::net::Ipv4Addr::UNSPECIFIED,
                            );
                        }
                        self.prepare_stats(id, now)?;
                        Some(id)
                    }
                    None => {
                        log::error!("[PD] statistics request failed, not published");
                        self.stats.num_no_pub += 1;
                        None
                    }
                }
            } else {
                let reply_com_id = if header.reply_com_id == 0 {
                    header.com_id
                } else {
                    header.reply_com_id
                };
                let found = queue::find_by_com_id(&self.arena, &self.snd_queue, reply_com_id);
                if found.is_none() {
                    self.stats.num_no_pub += 1;
                }
                found
            };

            if let Some(id) = pulled {
                if let Some(elem) = self.arena.get_mut(id) {
                    // Reply to the requested address, or to the requester.
                    elem.pull_ip = if header.reply_ip.is_unspecified() {
                        src_ip
                    } else {
                        header.reply_ip
                    };
                    elem.set_priv(PrivFlags::REQ_2B_SENT);
                }
                // The reply leaves within this event turn.
                if self.send_due(now).is_err() {
                    log::warn!("[PD] error sending one or more PD packets");
                }
                inform_user = true;
            }
        }

        // 5. Are we interested in this telegram at all?
        let subscriber = queue::find_subscriber(
            &self.arena,
            &self.rcv_queue,
            header.com_id,
            src_ip,
            dest_ip,
        );
        let mut err = None;

        if let Some(id) = subscriber {
            let elem = self.arena.get_mut(id).ok_or(PdError::NoInit)?;

            // 6. Subscriber gate: frame counters against those stored at
            // subscribe time (both zero on the frame = local traffic).
            let topo_ok = (header.etb_topo_cnt == 0 && header.op_trn_topo_cnt == 0)
                || topo_match(
                    header.etb_topo_cnt,
                    header.op_trn_topo_cnt,
                    elem.addr.etb_topo_cnt,
                    elem.addr.op_trn_topo_cnt,
                );
            if topo_ok {
                elem.last_src_ip = src_ip;
                elem.addr.dest_ip = dest_ip;

                // 7. Sequence discipline, per source and message type.
                let new_seq = header.sequence_counter;
                if new_seq == 0 {
                    // Restarted or new sender: admit it afresh, no gap math.
                    elem.seq_track.reset(src_ip, header.msg_type);
                    elem.cur_seq_cnt = 0;
                }
                match elem.seq_track.check(src_ip, header.msg_type, new_seq) {
                    SeqVerdict::Fresh => {}
                    SeqVerdict::Stale => {
                        log::info!(
                            "[PD] old data ignored (src {}, comId {})",
                            src_ip,
                            header.com_id
                        );
                        return Ok(());
                    }
                    SeqVerdict::Full => return Err(PdError::Mem),
                }

                if new_seq > 0 {
                    let cur = u64::from(elem.cur_seq_cnt);
                    let new = u64::from(new_seq);
                    if new > cur + 1 {
                        elem.stats.num_missed += (new - cur - 1) as u32;
                    } else if cur > new {
                        elem.stats.num_missed += (u64::from(u32::MAX) - cur + new) as u32;
                    }
                }
                elem.cur_seq_cnt = new_seq;

                // 8. The subscription may not have known the size yet.
                elem.data_size = header.dataset_length as usize;

                // 9. Has the data changed?
                if elem.pkt_flags.contains(PktFlags::CALLBACK) {
                    if elem.pkt_flags.contains(PktFlags::FORCE_CB)
                        || elem.has_priv(PrivFlags::TIMED_OUT)
                    {
                        inform_user = true;
                    } else if self.scratch.data(elem.data_size) != elem.frame.data(elem.data_size)
                    {
                        inform_user = true;
                    }
                }

                // 10. Re-arm the watchdog and refresh element state.
                elem.time_to_go = elem.interval.map(|iv| now + iv);
                elem.stats.num_rx_tx += 1;
                elem.last_err = None;
                elem.clear_priv(PrivFlags::TIMED_OUT);
                elem.clear_priv(PrivFlags::INVALID_DATA);

                // 11. Zero-copy handoff: the subscriber takes the validated
                // frame, the old one becomes the next scratch.
                std::mem::swap(&mut elem.frame, &mut self.scratch);
            } else {
                self.stats.num_topo_err += 1;
                elem.last_err = Some(PdError::Topo);
                err = Some(PdError::Topo);
                inform_user = true;
            }
        } else {
            self.stats.num_no_subs += 1;
            err = Some(PdError::NoSub);
        }

        // 12. Deliver to the application.
        if inform_user {
            if let Some(id) = subscriber {
                if let Some(elem) = self.arena.get(id) {
                    if elem.pkt_flags.contains(PktFlags::CALLBACK) {
                        if let Some(cb) = &elem.callback {
                            let info = pd_info_for(elem, dest_ip, err);
                            let data_len = (elem.frame.dataset_length() as usize)
                                .min(crate::config::MAX_PD_DATA_SIZE);
                            cb(&info, elem.frame.data(data_len));
                        }
                    }
                }
            }
        }

        match err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

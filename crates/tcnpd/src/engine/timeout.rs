// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timeout scanner: detect late subscriptions.

use crate::config::STATISTICS_REQUEST_COMID;
use crate::element::PrivFlags;
use crate::engine::pd_info_for;
use crate::error::PdError;
use crate::session::PdSession;
use crate::transport::Transport;
use std::time::Instant;

impl<T: Transport> PdSession<T> {
    /// Walk the receive queue and flag every subscription whose expected
    /// telegram is overdue. Each timeout episode notifies the application
    /// exactly once; a subsequent fresh telegram clears the flag and a new
    /// episode can begin. The subscription itself stays registered.
    pub fn handle_timeouts(&mut self, now: Instant) {
        for id in self.rcv_queue.clone() {
            let Some(elem) = self.arena.get_mut(id) else {
                continue;
            };

            let late = elem.interval.is_some()
                && elem.time_to_go.is_some_and(|t| t <= now)
                && !elem.has_priv(PrivFlags::TIMED_OUT)
                && elem.addr.com_id != STATISTICS_REQUEST_COMID;
            if !late {
                continue;
            }

            self.stats.num_timeout += 1;
            elem.last_err = Some(PdError::Timeout);
            log::debug!("[PD] comId {} timed out", elem.addr.com_id);

            if let Some(cb) = &elem.callback {
                // Populated from the stale frame if one was ever received,
                // zeroed otherwise; the size reflects the last known payload.
                let info = pd_info_for(elem, elem.addr.dest_ip, Some(PdError::Timeout));
                cb(&info, elem.frame.data(elem.data_size));
            }

            elem.set_priv(PrivFlags::TIMED_OUT);
        }
    }
}

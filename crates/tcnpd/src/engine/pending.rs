// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending scanner and socket dispatcher.

use crate::element::PrivFlags;
use crate::error::{PdError, Result};
use crate::session::PdSession;
use crate::transport::Transport;
use std::time::Instant;

impl<T: Transport> PdSession<T> {
    /// Rebuild the session's next-job deadline and collect the sockets the
    /// work loop must watch.
    ///
    /// The deadline is the earliest `time_to_go` across both queues; already
    /// timed-out subscriptions and pull-only elements do not contribute.
    /// Every subscriber with a bound socket is watched.
    pub fn check_pending(&mut self) -> (Option<Instant>, Vec<usize>) {
        let mut next_job: Option<Instant> = None;
        let mut watch: Vec<usize> = Vec::new();

        for &id in &self.rcv_queue {
            let Some(elem) = self.arena.get(id) else {
                continue;
            };
            if !elem.has_priv(PrivFlags::TIMED_OUT) && elem.interval.is_some() {
                if let Some(t) = elem.time_to_go {
                    if next_job.is_none_or(|n| t < n) {
                        next_job = Some(t);
                    }
                }
            }
            if let Some(sock) = elem.socket_idx {
                if !watch.contains(&sock) {
                    watch.push(sock);
                }
            }
        }

        // A queued telegram may be due even earlier.
        for &id in &self.snd_queue {
            let Some(elem) = self.arena.get(id) else {
                continue;
            };
            if elem.interval.is_some() {
                if let Some(t) = elem.time_to_go {
                    if next_job.is_none_or(|n| t < n) {
                        next_job = Some(t);
                    }
                }
            }
        }

        self.next_job = next_job;
        (next_job, watch)
    }

    /// Drain every ready socket through the receiver engine.
    ///
    /// In nonblocking mode a socket is read until dry; quiet classifications
    /// (no subscription, drained, no data) are passed through silently while
    /// anything else is logged at warning level. Returns the last
    /// classification seen.
    pub fn check_listen_socks(&mut self, ready: &[usize], now: Instant) -> Result<()> {
        let mut result = Ok(());
        let non_blocking = !self.options.blocking;

        for &sock in ready {
            let listened = self.rcv_queue.iter().any(|&id| {
                self.arena
                    .get(id)
                    .is_some_and(|e| e.socket_idx == Some(sock))
            });
            if !listened {
                continue;
            }

            loop {
                match self.receive(sock, now) {
                    Ok(()) => {
                        if non_blocking {
                            continue;
                        }
                        break;
                    }
                    Err(err @ (PdError::NoSub | PdError::Block | PdError::NoData)) => {
                        result = Err(err);
                        break;
                    }
                    Err(err) => {
                        result = Err(err);
                        log::warn!("[PD] receive failed: {}", err);
                        break;
                    }
                }
            }
        }
        result
    }
}

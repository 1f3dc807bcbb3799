// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Distribution shaper: spread publisher send times.
//!
//! PD telegrams are small enough that per-packet transmission time does not
//! matter, but a publisher set registered at the same instant would otherwise
//! emit in one burst every cycle. The shaper respaces the start times across
//! the smallest interval present in the queue. An element's start time is
//! only moved when the shift stays within half its own interval, so shaping
//! can never push consecutive emissions past the receiver's watchdog.

use crate::session::PdSession;
use crate::transport::Transport;
use std::time::{Duration, Instant};

impl<T: Transport> PdSession<T> {
    /// Respace the send times of the cyclic publishers.
    ///
    /// Nothing to shape (fewer than two cyclic elements) is not an error.
    pub fn distribute(&mut self) {
        let mut delta_t_max: Option<Duration> = None;
        let mut t_null: Option<Instant> = None;
        let mut no_of_packets: u32 = 0;

        // Smallest interval, latest-scheduled start, cyclic element count.
        // Pull-only elements do not take part.
        for &id in &self.snd_queue {
            let Some(elem) = self.arena.get(id) else {
                continue;
            };
            let Some(interval) = elem.interval else {
                continue;
            };
            if delta_t_max.is_none_or(|d| interval < d) {
                delta_t_max = Some(interval);
            }
            if let Some(t) = elem.time_to_go {
                if t_null.is_none_or(|n| t > n) {
                    t_null = Some(t);
                }
            }
            no_of_packets += 1;
        }

        let (Some(delta_t_max), Some(t_null)) = (delta_t_max, t_null) else {
            return;
        };
        if no_of_packets < 2 || delta_t_max.is_zero() {
            log::info!(
                "[PD] distribute: no minimal interval in {} packets",
                no_of_packets
            );
            return;
        }

        // The slot we can jitter each packet by.
        let slot = delta_t_max / no_of_packets;
        log::info!(
            "[PD] distribute: slot {:?}, {} packets",
            slot,
            no_of_packets
        );

        let mut packet_index: u32 = 0;
        for id in self.snd_queue.clone() {
            let Some(elem) = self.arena.get_mut(id) else {
                continue;
            };
            let Some(interval) = elem.interval else {
                continue;
            };

            let shift = slot * packet_index;
            if 2 * shift > interval {
                // The shifted start could exceed one interval and miss its
                // deadline; leave this element alone.
                log::info!(
                    "[PD] distribute: packet [{}] kept, shift {:?} too large for {:?}",
                    packet_index,
                    shift,
                    interval
                );
            } else {
                elem.time_to_go = Some(t_null + shift);
            }
            packet_index += 1;
        }
    }
}

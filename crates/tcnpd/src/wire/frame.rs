// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Owned PD frame buffer.
//!
//! A [`Frame`] holds one telegram in wire form: the 40-byte header followed by
//! the payload, zero-padded to 4-byte alignment. Each endpoint element owns
//! exactly one frame; the session owns one max-size scratch frame that is
//! swapped with a subscriber's frame when a received telegram is accepted.

use crate::config::{MAX_PD_DATA_SIZE, PD_HEADER_SIZE};
use crate::wire::{self, MsgType};
use std::net::Ipv4Addr;

/// Wire size of a PD telegram carrying `data_size` payload octets.
pub fn gross_size(data_size: usize) -> usize {
    PD_HEADER_SIZE + ((data_size + 3) & !3)
}

/// One PD telegram in wire form, exclusively owned.
#[derive(Debug, Clone)]
pub struct Frame {
    buf: Vec<u8>,
}

impl Frame {
    /// Allocate a zeroed frame sized for `data_size` payload octets.
    pub fn new(data_size: usize) -> Self {
        Self {
            buf: vec![0u8; gross_size(data_size)],
        }
    }

    /// Allocate a frame that can hold any PD telegram.
    ///
    /// Subscriber frames and the session scratch use this size so the
    /// receive-path swap never has to reallocate.
    pub fn max() -> Self {
        Self::new(MAX_PD_DATA_SIZE)
    }

    /// Grow the buffer to hold `data_size` payload octets, preserving the
    /// header bytes. No-op when already large enough.
    pub fn grow(&mut self, data_size: usize) {
        let wanted = gross_size(data_size);
        if wanted > self.buf.len() {
            self.buf.resize(wanted, 0);
        }
    }

    /// Full backing buffer (header + padded payload area).
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// The wire bytes of a telegram carrying `data_size` payload octets.
    pub fn wire_bytes(&self, data_size: usize) -> &[u8] {
        &self.buf[..gross_size(data_size)]
    }

    /// Payload slice of length `data_size`.
    pub fn data(&self, data_size: usize) -> &[u8] {
        &self.buf[PD_HEADER_SIZE..PD_HEADER_SIZE + data_size]
    }

    /// Mutable payload slice of length `data_size`.
    pub fn data_mut(&mut self, data_size: usize) -> &mut [u8] {
        &mut self.buf[PD_HEADER_SIZE..PD_HEADER_SIZE + data_size]
    }

    /// Raw buffer for the receive path (filled directly from the socket).
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Write all header fields except sequence counter and FCS.
    #[allow(clippy::too_many_arguments)]
    pub fn init_header(
        &mut self,
        msg_type: MsgType,
        com_id: u32,
        etb_topo_cnt: u32,
        op_trn_topo_cnt: u32,
        dataset_length: u32,
        reply_com_id: u32,
        reply_ip: Ipv4Addr,
    ) {
        wire::init(
            &mut self.buf,
            msg_type,
            com_id,
            etb_topo_cnt,
            op_trn_topo_cnt,
            dataset_length,
            reply_com_id,
            reply_ip,
        );
    }

    /// Message type currently stamped into the header.
    pub fn msg_type(&self) -> Option<MsgType> {
        wire::msg_type(&self.buf)
    }

    /// Overwrite the message type (PULL swap on the send path).
    pub fn set_msg_type(&mut self, t: MsgType) {
        wire::set_msg_type(&mut self.buf, t);
    }

    /// Overwrite the sequence counter field.
    pub fn set_sequence(&mut self, seq: u32) {
        wire::set_sequence(&mut self.buf, seq);
    }

    /// Dataset length currently stamped into the header.
    pub fn dataset_length(&self) -> u32 {
        wire::dataset_length(&self.buf)
    }

    /// Overwrite the dataset length field.
    pub fn set_dataset_length(&mut self, len: u32) {
        wire::set_dataset_length(&mut self.buf, len);
    }

    /// Recompute and store the header FCS.
    pub fn seal(&mut self) {
        wire::seal(&mut self.buf);
    }

    /// Decode the header fields (receive path convenience).
    pub fn header(&self) -> crate::error::Result<wire::PdHeader> {
        wire::PdHeader::decode(&self.buf)
    }
}

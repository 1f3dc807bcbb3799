// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PD header codec.
//!
//! The PD header is a fixed 40-byte structure in network byte order. The last
//! field is the frame check sum (FCS), a CRC32 (IEEE 802.3) over the first 36
//! header bytes, stored **little-endian** regardless of the architecture.
//! Endianness is handled exclusively here; no other module touches raw header
//! bytes.
//!
//! ```text
//! 0                   1                   2                   3
//! +---------------+---------------+---------------+---------------+
//! |                        sequenceCounter                        |
//! +-------------------------------+-------------------------------+
//! |        protocolVersion        |            msgType            |
//! +-------------------------------+-------------------------------+
//! |                             comId                             |
//! +---------------------------------------------------------------+
//! |                           etbTopoCnt                          |
//! +---------------------------------------------------------------+
//! |                          opTrnTopoCnt                         |
//! +---------------------------------------------------------------+
//! |                         datasetLength                         |
//! +---------------------------------------------------------------+
//! |                            reserved                           |
//! +---------------------------------------------------------------+
//! |                          replyComId                           |
//! +---------------------------------------------------------------+
//! |                         replyIpAddress                        |
//! +---------------------------------------------------------------+
//! |                       frameCheckSum (LE)                      |
//! +---------------------------------------------------------------+
//! ```

pub mod frame;

pub use frame::Frame;

use crate::config::{
    MAX_PD_DATA_SIZE, MAX_PD_PACKET_SIZE, MIN_PD_PACKET_SIZE, PD_HEADER_SIZE, PROTOCOL_VERSION,
    PROTOCOL_VERSION_MASK,
};
use crate::error::{PdError, Result};
use std::net::Ipv4Addr;

// Field offsets within the header.
const OFF_SEQUENCE: usize = 0;
const OFF_PROTO_VERSION: usize = 4;
const OFF_MSG_TYPE: usize = 6;
const OFF_COM_ID: usize = 8;
const OFF_ETB_TOPO: usize = 12;
const OFF_OP_TRN_TOPO: usize = 16;
const OFF_DATASET_LEN: usize = 20;
const OFF_RESERVED: usize = 24;
const OFF_REPLY_COM_ID: usize = 28;
const OFF_REPLY_IP: usize = 32;
const OFF_FCS: usize = 36;

/// PD message type, two ASCII characters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MsgType {
    /// 'Pd' - cyclic process data
    Pd = 0x5064,
    /// 'Pp' - pulled process data (reply to a request)
    Pp = 0x5070,
    /// 'Pr' - process data pull request
    Pr = 0x5072,
    /// 'Pe' - process data error
    Pe = 0x5065,
}

impl MsgType {
    /// Decode a wire value; `None` for anything outside the PD family.
    pub const fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            0x5064 => Some(MsgType::Pd),
            0x5070 => Some(MsgType::Pp),
            0x5072 => Some(MsgType::Pr),
            0x5065 => Some(MsgType::Pe),
            _ => None,
        }
    }
}

/// Decoded view of a PD header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdHeader {
    /// Sequence counter, per (source IP, message type)
    pub sequence_counter: u32,
    /// Protocol version (masked compare)
    pub protocol_version: u16,
    /// Message type
    pub msg_type: MsgType,
    /// ComID of the telegram
    pub com_id: u32,
    /// ETB topology counter (0 = wildcard)
    pub etb_topo_cnt: u32,
    /// Operational train topology counter (0 = wildcard)
    pub op_trn_topo_cnt: u32,
    /// Payload length in octets, excluding padding
    pub dataset_length: u32,
    /// ComID the pulled publisher shall reply on (PR only)
    pub reply_com_id: u32,
    /// IP address the pulled publisher shall reply to (PR only)
    pub reply_ip: Ipv4Addr,
}

impl PdHeader {
    /// Decode a header from the first [`PD_HEADER_SIZE`] bytes of `buf`.
    ///
    /// Only structural decoding; validation is [`check`]'s job.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PD_HEADER_SIZE {
            return Err(PdError::Wire);
        }
        let msg_type = MsgType::from_u16(read_u16(buf, OFF_MSG_TYPE)).ok_or(PdError::Wire)?;
        Ok(Self {
            sequence_counter: read_u32(buf, OFF_SEQUENCE),
            protocol_version: read_u16(buf, OFF_PROTO_VERSION),
            msg_type,
            com_id: read_u32(buf, OFF_COM_ID),
            etb_topo_cnt: read_u32(buf, OFF_ETB_TOPO),
            op_trn_topo_cnt: read_u32(buf, OFF_OP_TRN_TOPO),
            dataset_length: read_u32(buf, OFF_DATASET_LEN),
            reply_com_id: read_u32(buf, OFF_REPLY_COM_ID),
            reply_ip: Ipv4Addr::from(read_u32(buf, OFF_REPLY_IP)),
        })
    }
}

/// Check that a received PD frame is sane.
///
/// Classifies into `Ok`, [`PdError::Crc`] (FCS mismatch) or [`PdError::Wire`]
/// (bad size, protocol version, dataset length or message type).
pub fn check(buf: &[u8], observed_size: usize) -> Result<()> {
    if observed_size < MIN_PD_PACKET_SIZE
        || observed_size > MAX_PD_PACKET_SIZE
        || buf.len() < PD_HEADER_SIZE
    {
        log::info!("[PD] frame size error ({} octets)", observed_size);
        return Err(PdError::Wire);
    }

    let fcs = compute_fcs(buf);
    if read_fcs(buf) != fcs {
        log::info!(
            "[PD] frame crc error ({:08x} != {:08x})",
            read_fcs(buf),
            fcs
        );
        return Err(PdError::Crc);
    }

    let version = read_u16(buf, OFF_PROTO_VERSION);
    let dataset_length = read_u32(buf, OFF_DATASET_LEN) as usize;
    if (version & PROTOCOL_VERSION_MASK) != (PROTOCOL_VERSION & PROTOCOL_VERSION_MASK)
        || dataset_length > MAX_PD_DATA_SIZE
        || PD_HEADER_SIZE + dataset_length > observed_size
    {
        log::info!(
            "[PD] frame protocol error (version {:04x}, length {})",
            version,
            dataset_length
        );
        return Err(PdError::Wire);
    }

    let raw_type = read_u16(buf, OFF_MSG_TYPE);
    if MsgType::from_u16(raw_type).is_none() {
        log::info!("[PD] frame type error, received {:04x}", raw_type);
        return Err(PdError::Wire);
    }

    Ok(())
}

/// CRC32 (IEEE 802.3) over the header bytes up to but excluding the FCS field.
pub fn compute_fcs(buf: &[u8]) -> u32 {
    crc32fast::hash(&buf[..OFF_FCS])
}

// ===== In-place accessors used by the send path =====
// The frame buffer keeps the header in wire form; the sender mutates the
// sequence counter and message type in place and then re-seals the FCS.

pub(crate) fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

pub(crate) fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub(crate) fn write_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], off: usize, value: u32) {
    buf[off..off + 4].copy_from_slice(&value.to_be_bytes());
}

fn read_fcs(buf: &[u8]) -> u32 {
    u32::from_le_bytes([
        buf[OFF_FCS],
        buf[OFF_FCS + 1],
        buf[OFF_FCS + 2],
        buf[OFF_FCS + 3],
    ])
}

pub(crate) fn set_sequence(buf: &mut [u8], seq: u32) {
    write_u32(buf, OFF_SEQUENCE, seq);
}

pub(crate) fn msg_type(buf: &[u8]) -> Option<MsgType> {
    MsgType::from_u16(read_u16(buf, OFF_MSG_TYPE))
}

pub(crate) fn set_msg_type(buf: &mut [u8], t: MsgType) {
    write_u16(buf, OFF_MSG_TYPE, t as u16);
}

pub(crate) fn dataset_length(buf: &[u8]) -> u32 {
    read_u32(buf, OFF_DATASET_LEN)
}

pub(crate) fn set_dataset_length(buf: &mut [u8], len: u32) {
    write_u32(buf, OFF_DATASET_LEN, len);
}

/// Recompute and store the FCS (little-endian) over the current header bytes.
pub(crate) fn seal(buf: &mut [u8]) {
    let fcs = compute_fcs(buf);
    buf[OFF_FCS..OFF_FCS + 4].copy_from_slice(&fcs.to_le_bytes());
}

/// Write all header fields except sequence counter and FCS.
#[allow(clippy::too_many_arguments)]
pub(crate) fn init(
    buf: &mut [u8],
    msg_type: MsgType,
    com_id: u32,
    etb_topo_cnt: u32,
    op_trn_topo_cnt: u32,
    dataset_length: u32,
    reply_com_id: u32,
    reply_ip: Ipv4Addr,
) {
    write_u16(buf, OFF_PROTO_VERSION, PROTOCOL_VERSION);
    write_u16(buf, OFF_MSG_TYPE, msg_type as u16);
    write_u32(buf, OFF_COM_ID, com_id);
    write_u32(buf, OFF_ETB_TOPO, etb_topo_cnt);
    write_u32(buf, OFF_OP_TRN_TOPO, op_trn_topo_cnt);
    write_u32(buf, OFF_DATASET_LEN, dataset_length);
    write_u32(buf, OFF_RESERVED, 0);
    write_u32(buf, OFF_REPLY_COM_ID, reply_com_id);
    write_u32(buf, OFF_REPLY_IP, u32::from(reply_ip));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed_header(msg_type: MsgType, dataset_length: u32) -> Vec<u8> {
        let mut buf = vec![0u8; PD_HEADER_SIZE + dataset_length as usize];
        init(
            &mut buf,
            msg_type,
            1000,
            0,
            0,
            dataset_length,
            0,
            Ipv4Addr::UNSPECIFIED,
        );
        set_sequence(&mut buf, 1);
        seal(&mut buf);
        buf
    }

    #[test]
    fn test_check_accepts_sealed_header() {
        let buf = sealed_header(MsgType::Pd, 0);
        assert_eq!(check(&buf, buf.len()), Ok(()));
    }

    #[test]
    fn test_check_rejects_bad_fcs() {
        let mut buf = sealed_header(MsgType::Pd, 0);
        buf[8] ^= 0xFF; // corrupt comId after sealing
        assert_eq!(check(&buf, buf.len()), Err(PdError::Crc));
    }

    #[test]
    fn test_check_rejects_version_mismatch() {
        let mut buf = sealed_header(MsgType::Pd, 0);
        write_u16(&mut buf, OFF_PROTO_VERSION, 0x0200);
        seal(&mut buf);
        assert_eq!(check(&buf, buf.len()), Err(PdError::Wire));
    }

    #[test]
    fn test_check_rejects_unknown_msg_type() {
        let mut buf = sealed_header(MsgType::Pd, 0);
        write_u16(&mut buf, OFF_MSG_TYPE, 0x4D6E); // 'Mn', message data
        seal(&mut buf);
        assert_eq!(check(&buf, buf.len()), Err(PdError::Wire));
    }

    #[test]
    fn test_check_dataset_length_boundary() {
        // Exactly at the maximum: accepted.
        let buf = sealed_header(MsgType::Pd, MAX_PD_DATA_SIZE as u32);
        assert_eq!(check(&buf, buf.len()), Ok(()));

        // One above: wire error.
        let mut buf = vec![0u8; MAX_PD_PACKET_SIZE];
        init(
            &mut buf,
            MsgType::Pd,
            1000,
            0,
            0,
            MAX_PD_DATA_SIZE as u32 + 1,
            0,
            Ipv4Addr::UNSPECIFIED,
        );
        seal(&mut buf);
        assert_eq!(check(&buf, buf.len()), Err(PdError::Wire));
    }

    #[test]
    fn test_check_size_bounds() {
        let buf = sealed_header(MsgType::Pd, 0);
        assert_eq!(check(&buf, PD_HEADER_SIZE - 1), Err(PdError::Wire));
        assert_eq!(check(&buf, MAX_PD_PACKET_SIZE + 1), Err(PdError::Wire));
    }

    #[test]
    fn test_fcs_is_little_endian() {
        let buf = sealed_header(MsgType::Pd, 0);
        let expected = compute_fcs(&buf);
        assert_eq!(
            u32::from_le_bytes([buf[36], buf[37], buf[38], buf[39]]),
            expected
        );
    }

    #[test]
    fn test_decode_round_trip() {
        let mut buf = vec![0u8; PD_HEADER_SIZE];
        init(
            &mut buf,
            MsgType::Pr,
            31,
            7,
            9,
            0,
            35,
            Ipv4Addr::new(10, 0, 0, 2),
        );
        set_sequence(&mut buf, 42);
        seal(&mut buf);

        let header = PdHeader::decode(&buf).unwrap();
        assert_eq!(header.sequence_counter, 42);
        assert_eq!(header.msg_type, MsgType::Pr);
        assert_eq!(header.com_id, 31);
        assert_eq!(header.etb_topo_cnt, 7);
        assert_eq!(header.op_trn_topo_cnt, 9);
        assert_eq!(header.reply_com_id, 35);
        assert_eq!(header.reply_ip, Ipv4Addr::new(10, 0, 0, 2));
    }
}

//! E1.31 wire format parsing
//!
//! Handles both the ratified E1.31 data packet (root layer vector
//! 0x00000004) and the draft BSR E1.31 rev. 0.2 packet (root layer vector
//! 0x00000003) that some older gear still transmits. The two formats are
//! mutually exclusive per datagram and are tracked per source.

use std::fmt;
use uuid::Uuid;

/// ACN packet identifier, constant for every root layer ("ASC-E1.17")
pub const ACN_PACKET_IDENTIFIER: [u8; 12] = [
    0x41, 0x53, 0x43, 0x2d, 0x45, 0x31, 0x2e, 0x31, 0x37, 0x00, 0x00, 0x00,
];

/// Root layer vector for ratified E1.31 data packets
pub const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
/// Root layer vector for draft (rev. 0.2) E1.31 data packets
pub const VECTOR_ROOT_E131_DATA_DRAFT: u32 = 0x0000_0003;
/// Framing layer vector for data packets
pub const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
/// DMP layer vector
pub const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;

/// DMX level data start code
pub const STARTCODE_DMX: u8 = 0x00;
/// Per-channel priority start code (E1.31 alternate start code 0xDD)
pub const STARTCODE_PRIORITY: u8 = 0xDD;

/// Options bit: preview data, not for live output
pub const OPTIONS_PREVIEW: u8 = 0x80;
/// Options bit: source is terminating its stream
pub const OPTIONS_STREAM_TERMINATED: u8 = 0x40;

/// Highest E1.31 priority
pub const MAX_PRIORITY: u8 = 200;
/// Highest valid universe number
pub const MAX_UNIVERSE: u16 = 63999;

const RELEASE_MIN_LEN: usize = 126;
const DRAFT_MIN_LEN: usize = 91;

/// Which revision of the protocol a packet (and hence a source) speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    Draft,
    Release,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Draft => write!(f, "Draft"),
            ProtocolVersion::Release => write!(f, "Release"),
        }
    }
}

/// One parsed E1.31 data frame
///
/// `data` holds the DMP property values after the start code, at most 512
/// bytes: channel levels for start code 0x00, per-channel priorities for
/// start code 0xDD.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub cid: Uuid,
    pub source_name: String,
    pub universe: u16,
    pub sequence: u8,
    pub priority: u8,
    pub protocol: ProtocolVersion,
    pub preview: bool,
    pub stream_terminated: bool,
    pub start_code: u8,
    pub data: Vec<u8>,
}

/// Parse a datagram payload into a [`DataFrame`].
///
/// Returns `None` for anything structurally invalid: wrong preamble or ACN
/// identifier, unknown vectors, short packets, out-of-range universe or
/// priority, or a DMP property count that disagrees with the payload
/// length. Malformed input is dropped, never surfaced as an error.
pub fn parse_data_frame(payload: &[u8]) -> Option<DataFrame> {
    if payload.len() < 22 {
        return None;
    }
    if payload[0..2] != [0x00, 0x10] || payload[2..4] != [0x00, 0x00] {
        return None;
    }
    if payload[4..16] != ACN_PACKET_IDENTIFIER {
        return None;
    }

    let root_vector = u32::from_be_bytes([payload[18], payload[19], payload[20], payload[21]]);
    match root_vector {
        VECTOR_ROOT_E131_DATA => parse_release(payload),
        VECTOR_ROOT_E131_DATA_DRAFT => parse_draft(payload),
        _ => None,
    }
}

fn parse_release(payload: &[u8]) -> Option<DataFrame> {
    if payload.len() < RELEASE_MIN_LEN {
        return None;
    }

    let framing_vector = u32::from_be_bytes([payload[40], payload[41], payload[42], payload[43]]);
    if framing_vector != VECTOR_E131_DATA_PACKET {
        return None;
    }
    if payload[117] != VECTOR_DMP_SET_PROPERTY || payload[118] != 0xa1 {
        return None;
    }

    let cid = Uuid::from_slice(&payload[22..38]).ok()?;
    let source_name = parse_source_name(&payload[44..108]);
    let priority = payload[108];
    if priority > MAX_PRIORITY {
        return None;
    }
    let sequence = payload[111];
    let options = payload[112];
    let universe = u16::from_be_bytes([payload[113], payload[114]]);
    if universe == 0 || universe > MAX_UNIVERSE {
        return None;
    }

    // Property count covers the start code plus the data slots
    let count = u16::from_be_bytes([payload[123], payload[124]]) as usize;
    if count == 0 || count > 513 {
        return None;
    }
    let data_len = count - 1;
    if payload.len() < RELEASE_MIN_LEN + data_len {
        return None;
    }
    let start_code = payload[125];
    let data = payload[126..126 + data_len].to_vec();

    Some(DataFrame {
        cid,
        source_name,
        universe,
        sequence,
        priority,
        protocol: ProtocolVersion::Release,
        preview: options & OPTIONS_PREVIEW != 0,
        stream_terminated: options & OPTIONS_STREAM_TERMINATED != 0,
        start_code,
        data,
    })
}

fn parse_draft(payload: &[u8]) -> Option<DataFrame> {
    if payload.len() < DRAFT_MIN_LEN {
        return None;
    }

    let framing_vector = u32::from_be_bytes([payload[40], payload[41], payload[42], payload[43]]);
    if framing_vector != VECTOR_E131_DATA_PACKET {
        return None;
    }
    if payload[82] != VECTOR_DMP_SET_PROPERTY || payload[83] != 0xa1 {
        return None;
    }

    let cid = Uuid::from_slice(&payload[22..38]).ok()?;
    // Draft framing layer: 32 byte source name, no sync address, no options
    let source_name = parse_source_name(&payload[44..76]);
    let priority = payload[76];
    if priority > MAX_PRIORITY {
        return None;
    }
    let sequence = payload[77];
    let universe = u16::from_be_bytes([payload[78], payload[79]]);
    if universe == 0 || universe > MAX_UNIVERSE {
        return None;
    }

    let count = u16::from_be_bytes([payload[88], payload[89]]) as usize;
    if count == 0 || count > 513 {
        return None;
    }
    let data_len = count - 1;
    if payload.len() < DRAFT_MIN_LEN + data_len {
        return None;
    }
    let start_code = payload[90];
    let data = payload[91..91 + data_len].to_vec();

    Some(DataFrame {
        cid,
        source_name,
        universe,
        sequence,
        priority,
        protocol: ProtocolVersion::Draft,
        preview: false,
        stream_terminated: false,
        start_code,
        data,
    })
}

fn parse_source_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

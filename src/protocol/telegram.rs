//! Telegram layout and (de)serialization
//!
//! An inbound telegram looks like:
//!
//! ```text
//! 0x41 | length | msgtype | method | addr_hi | addr_lo | payload_len | payload... | checksum
//! ```
//!
//! where `length` counts everything after itself up to (not including) the
//! checksum, i.e. `payload_len + 5`, and the total frame is `payload_len + 8`
//! bytes.

use crate::error::{Result, VitoError};
use crate::protocol::checksum::telegram_checksum;
use crate::protocol::wire::TELEGRAM_START;

/// Message type of a request telegram
pub const MSGTYPE_REQUEST: u8 = 0x00;
/// Message type of an answer telegram
pub const MSGTYPE_ANSWER: u8 = 0x01;
/// Method byte of an outbound data read
pub const METHOD_READ_DATA: u8 = 0x01;

/// Total length of an inbound frame whose payload-length byte reads `n`
pub const fn frame_len(payload_len: u8) -> usize {
    payload_len as usize + 8
}

/// A validated answer telegram, owned payload included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseRecord {
    pub msgtype: u8,
    pub method: u8,
    pub address: u16,
    pub payload: Vec<u8>,
}

impl ResponseRecord {
    /// Parse and validate a complete inbound frame
    ///
    /// The frame must start at the 0x41 marker and end with the checksum
    /// byte. Checksum and length-consistency failures are reported as
    /// errors; the caller decides whether to count or surface them.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        if frame.len() < 8 || frame[0] != TELEGRAM_START {
            return Err(VitoError::Protocol(format!(
                "Malformed telegram: {}",
                hexlify(frame)
            )));
        }

        let expected = telegram_checksum(frame);
        let actual = frame[frame.len() - 1];
        if expected != actual {
            return Err(VitoError::Checksum { expected, actual });
        }

        if frame.len() != frame_len(frame[6]) {
            return Err(VitoError::Protocol(format!(
                "Bad payload length: {}",
                hexlify(frame)
            )));
        }

        Ok(Self {
            msgtype: frame[2],
            method: frame[3],
            address: u16::from_be_bytes([frame[4], frame[5]]),
            payload: frame[7..frame.len() - 1].to_vec(),
        })
    }
}

/// Encode an 8-byte read request for `expected_len` bytes at `addr`
pub fn encode_read_request(addr: u16, expected_len: u8) -> [u8; 8] {
    let mut msg = [0u8; 8];
    msg[0] = TELEGRAM_START;
    msg[1] = 5; // telegram length up to, not including, the checksum
    msg[2] = MSGTYPE_REQUEST;
    msg[3] = METHOD_READ_DATA;
    msg[4] = (addr >> 8) as u8;
    msg[5] = (addr & 0xff) as u8;
    msg[6] = expected_len;
    msg[7] = telegram_checksum(&msg);
    msg
}

/// Lowercase hex rendering of a byte slice for log output
pub fn hexlify(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

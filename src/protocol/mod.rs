//! Optolink protocol implementation
//!
//! Based on the KW/P300-style telegram exchange spoken by Vitotronic
//! controllers:
//! - ENQ/SYNC handshake with periodic keep-alive
//! - 0x41-framed telegrams with a length field and mod-256 checksum
//! - Big-endian data point addresses, single outstanding read request

pub mod checksum;
pub mod engine;
pub mod telegram;
pub mod wire;

// Re-export commonly used items
pub use checksum::{telegram_checksum, verify_checksum};
pub use engine::{ProtocolEngine, RxCounters, RxState};
pub use telegram::{encode_read_request, ResponseRecord};

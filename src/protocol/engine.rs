//! Link synchronization and telegram framing engine
//!
//! The engine is a pure state machine: it consumes inbound byte chunks,
//! tracks the handshake with the controller, assembles telegrams, and
//! queues outbound frames for the transport to drain. It never performs
//! I/O and never blocks, so it can be driven byte-for-byte from tests.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, VitoError};
use crate::protocol::telegram::{encode_read_request, hexlify, ResponseRecord};
use crate::protocol::wire::{control_name, ACK, ENQ, EOT, NAK, SYNC_SEQ, TELEGRAM_START};

/// Interval the scheduler is expected to call [`ProtocolEngine::on_tick`] at
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Idle ticks in `Sync` before the sync sequence is re-emitted (30 s)
pub const SYNC_KEEPALIVE_TICKS: u32 = 60;

/// Idle ticks in any other state before the handshake restarts (4 s)
pub const HANDSHAKE_TIMEOUT_TICKS: u32 = 8;

/// Receive-side state of the link
///
/// Transitions, with the frame the engine answers in parentheses:
///
/// | state   | ACK  | NAK         | ENQ           | 0x41 | other  |
/// |---------|------|-------------|---------------|------|--------|
/// | Unsync  | stay | Sync (SYNC) | Startup (EOT) | stay | stay   |
/// | Startup | Unsync | Unsync    | Sync (SYNC)   | Unsync | Unsync |
/// | Sync    | stay | stay        | Unsync        | Busy | Unsync |
/// | Busy    | collect telegram bytes until complete, then Sync   |
///
/// Bytes the state does not expect increment the framing-error counter;
/// ACK and NAK received in `Sync` only bump their counters.
///
/// `Start` exists only to swallow a stale RX buffer; the first chunk moves
/// the engine to `Unsync`. A handshake stalled for 4 s falls back to
/// `Unsync` (EOT); a synced link idle for 30 s gets a fresh SYNC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// Nothing received yet; the serial RX buffer may hold stale junk
    Start,
    /// Waiting for the controller to offer a handshake
    Unsync,
    /// EOT sent, waiting for the controller's next ENQ
    Startup,
    /// Handshake complete; requests may be sent, telegrams received
    Sync,
    /// Start marker seen, assembling a telegram
    Busy,
}

/// Monotonic per-request receive counters
///
/// Reset by the orchestrator before each request so that any non-zero
/// counter observed while a request is outstanding refers to that request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxCounters {
    pub acks: u32,
    pub naks: u32,
    pub timeouts: u32,
    pub errors: u32,
    pub messages: u32,
}

/// Optolink protocol engine
///
/// Owns the receive buffer, state, counters, the queue of not-yet-claimed
/// response records, and the queue of outbound frames. All mutation happens
/// through the methods below, driven by the transport's RX and tick tasks.
#[derive(Debug)]
pub struct ProtocolEngine {
    state: RxState,
    rx_buf: Vec<u8>,
    idle_ticks: u32,
    counters: RxCounters,
    pending: VecDeque<ResponseRecord>,
    tx_queue: VecDeque<Bytes>,
}

impl ProtocolEngine {
    pub fn new() -> Self {
        Self {
            state: RxState::Start,
            rx_buf: Vec::with_capacity(64),
            idle_ticks: 0,
            counters: RxCounters::default(),
            pending: VecDeque::new(),
            tx_queue: VecDeque::new(),
        }
    }

    /// Current receive state
    pub fn state(&self) -> RxState {
        self.state
    }

    /// Snapshot of the receive counters
    pub fn counters(&self) -> RxCounters {
        self.counters
    }

    /// Feed a chunk of inbound bytes
    ///
    /// Never blocks. May queue outbound frames (handshake replies) and
    /// update state, counters, and the pending-response queue.
    pub fn on_bytes(&mut self, data: &[u8]) {
        // Upon start there may be a lot of junk in the stale RX buffer of
        // the serial interface; drop the whole first chunk unless it is a
        // single byte.
        if self.state == RxState::Start {
            self.state = RxState::Unsync;
            if data.len() > 1 {
                return;
            }
        }

        for &byte in data {
            self.on_byte(byte);
        }
    }

    fn on_byte(&mut self, byte: u8) {
        match self.state {
            RxState::Start => unreachable!("Start is left on first chunk"),

            RxState::Unsync => match byte {
                NAK => {
                    tracing::debug!("Received NAK, sending sync sequence");
                    self.send(Bytes::from_static(&SYNC_SEQ));
                    self.state = RxState::Sync;
                }
                ENQ => {
                    tracing::debug!("Received ENQ, sending EOT");
                    self.send(Bytes::from_static(&[EOT]));
                    self.state = RxState::Startup;
                }
                other => {
                    tracing::warn!("Received {} while unsynced", control_name(other));
                    self.counters.errors += 1;
                }
            },

            RxState::Startup => match byte {
                ENQ => {
                    tracing::debug!("Received ENQ, sending sync sequence");
                    self.send(Bytes::from_static(&SYNC_SEQ));
                    self.state = RxState::Sync;
                }
                other => {
                    tracing::warn!("Unexpected {} in sync start", control_name(other));
                    self.counters.errors += 1;
                    self.state = RxState::Unsync;
                }
            },

            RxState::Sync => match byte {
                ACK => {
                    tracing::debug!("Received ACK");
                    self.counters.acks += 1;
                    self.idle_ticks = 0;
                }
                NAK => {
                    tracing::debug!("Received NAK");
                    self.counters.naks += 1;
                    self.idle_ticks = 0;
                }
                TELEGRAM_START => {
                    self.rx_buf.clear();
                    self.rx_buf.push(byte);
                    self.state = RxState::Busy;
                }
                other => {
                    tracing::warn!("Unexpected {} received", control_name(other));
                    self.counters.errors += 1;
                    self.state = RxState::Unsync;
                }
            },

            RxState::Busy => {
                self.rx_buf.push(byte);

                // The length field counts everything after itself up to the
                // checksum, so a complete frame holds length + 3 bytes.
                if self.rx_buf.len() >= self.rx_buf[1] as usize + 3 {
                    self.complete_telegram();
                }
            }
        }
    }

    fn complete_telegram(&mut self) {
        match ResponseRecord::parse(&self.rx_buf) {
            Ok(record) => {
                tracing::debug!(
                    "Received {}/{}/{:#06x} {}",
                    record.msgtype,
                    record.method,
                    record.address,
                    hexlify(&record.payload)
                );
                self.pending.push_back(record);
                self.counters.messages += 1;
            }
            Err(err) => {
                tracing::error!("{}: {}", err, hexlify(&self.rx_buf));
                self.counters.errors += 1;
            }
        }

        self.idle_ticks = 0;
        self.state = RxState::Sync;
    }

    /// Advance the timeout counter; called every [`TICK_INTERVAL`]
    ///
    /// In `Sync` a long-idle link gets a fresh sync sequence as keep-alive.
    /// In every other state a stalled handshake is abandoned: the timeout
    /// counter is bumped, EOT is sent, and the engine drops to `Unsync`.
    pub fn on_tick(&mut self) {
        self.idle_ticks += 1;

        if self.state == RxState::Sync {
            if self.idle_ticks >= SYNC_KEEPALIVE_TICKS {
                tracing::debug!("Link idle, re-sending sync sequence");
                self.send(Bytes::from_static(&SYNC_SEQ));
                self.idle_ticks = 0;
            }
        } else if self.idle_ticks >= HANDSHAKE_TIMEOUT_TICKS {
            tracing::error!("RX timeout in state {:?}", self.state);
            self.counters.timeouts += 1;
            self.state = RxState::Unsync;
            self.send(Bytes::from_static(&[EOT]));
            self.idle_ticks = 0;
        }
    }

    /// Submit a read request for `expected_len` bytes at `addr`
    ///
    /// Only valid in `Sync`; queues the 8-byte request frame and returns
    /// immediately. The answer, if any, arrives through the pending queue.
    pub fn request_read(&mut self, addr: u16, expected_len: u8) -> Result<()> {
        if self.state != RxState::Sync {
            tracing::error!("request_read() in state {:?}", self.state);
            return Err(VitoError::NotSynced);
        }

        tracing::debug!(
            "Requesting data at address {:#06x}, len {}",
            addr,
            expected_len
        );
        self.send(Bytes::copy_from_slice(&encode_read_request(
            addr,
            expected_len,
        )));
        Ok(())
    }

    /// Zero all counters and drop unclaimed responses
    ///
    /// Called by the orchestrator before every request so that subsequent
    /// counter readings and queue pops refer to that request alone. The
    /// outbound frame queue is left untouched.
    pub fn clear_rx(&mut self) {
        self.counters = RxCounters::default();
        self.pending.clear();
    }

    /// Non-blocking pull of the oldest queued response
    pub fn pop_response(&mut self) -> Option<ResponseRecord> {
        self.pending.pop_front()
    }

    /// Drain all outbound frames queued by the state machine
    ///
    /// The transport writes each returned frame atomically.
    pub fn drain_tx(&mut self) -> Vec<Bytes> {
        self.tx_queue.drain(..).collect()
    }

    fn send(&mut self, frame: Bytes) {
        self.tx_queue.push_back(frame);
    }
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a fresh engine through the ENQ/SYNC handshake
    fn synced_engine() -> ProtocolEngine {
        let mut engine = ProtocolEngine::new();
        engine.on_bytes(&[ENQ]);
        engine.on_bytes(&[ENQ]);
        assert_eq!(engine.state(), RxState::Sync);
        engine.drain_tx();
        engine
    }

    #[test]
    fn test_handshake_via_enq() {
        let mut engine = ProtocolEngine::new();
        assert_eq!(engine.state(), RxState::Start);

        engine.on_bytes(&[ENQ]);
        assert_eq!(engine.state(), RxState::Startup);
        assert_eq!(engine.drain_tx(), vec![Bytes::from_static(&[0x04])]);

        engine.on_bytes(&[ENQ]);
        assert_eq!(engine.state(), RxState::Sync);
        assert_eq!(engine.drain_tx(), vec![Bytes::from_static(&[0x16, 0x00, 0x00])]);
    }

    #[test]
    fn test_handshake_via_nak() {
        let mut engine = ProtocolEngine::new();
        engine.on_bytes(&[NAK]);
        assert_eq!(engine.state(), RxState::Sync);
        assert_eq!(engine.drain_tx(), vec![Bytes::from_static(&[0x16, 0x00, 0x00])]);
    }

    #[test]
    fn test_stale_first_chunk_is_discarded() {
        let mut engine = ProtocolEngine::new();
        // A multi-byte first chunk is stale RX buffer content
        engine.on_bytes(&[0xFF, 0x12, ENQ]);
        assert_eq!(engine.state(), RxState::Unsync);
        assert!(engine.drain_tx().is_empty());
        assert_eq!(engine.counters().errors, 0);

        // The next chunk is processed normally
        engine.on_bytes(&[ENQ]);
        assert_eq!(engine.state(), RxState::Startup);
    }

    #[test]
    fn test_junk_while_unsynced_counts_errors() {
        let mut engine = ProtocolEngine::new();
        engine.on_bytes(&[0x00]);
        assert_eq!(engine.state(), RxState::Unsync);
        engine.on_bytes(&[0x42, 0x43]);
        assert_eq!(engine.counters().errors, 2);
        assert_eq!(engine.state(), RxState::Unsync);
    }

    #[test]
    fn test_junk_in_startup_falls_back_to_unsync() {
        let mut engine = ProtocolEngine::new();
        engine.on_bytes(&[ENQ]);
        assert_eq!(engine.state(), RxState::Startup);
        engine.on_bytes(&[ACK]);
        assert_eq!(engine.state(), RxState::Unsync);
        assert_eq!(engine.counters().errors, 1);
    }

    #[test]
    fn test_ack_nak_counted_in_sync() {
        let mut engine = synced_engine();
        engine.on_bytes(&[ACK, ACK, NAK]);
        assert_eq!(engine.state(), RxState::Sync);
        assert_eq!(engine.counters().acks, 2);
        assert_eq!(engine.counters().naks, 1);
    }

    #[test]
    fn test_junk_in_sync_falls_back_to_unsync() {
        let mut engine = synced_engine();
        engine.on_bytes(&[0x55]);
        assert_eq!(engine.state(), RxState::Unsync);
        assert_eq!(engine.counters().errors, 1);
    }

    #[test]
    fn test_telegram_assembly_across_chunks() {
        let mut engine = synced_engine();
        engine.on_bytes(&[0x41, 0x07, 0x01]);
        assert_eq!(engine.state(), RxState::Busy);
        engine.on_bytes(&[0x01, 0x08, 0x00, 0x02, 0xE8]);
        assert_eq!(engine.state(), RxState::Busy);
        engine.on_bytes(&[0x03, 0xF6]);
        assert_eq!(engine.state(), RxState::Sync);

        let record = engine.pop_response().expect("record queued");
        assert_eq!(record.msgtype, 1);
        assert_eq!(record.method, 1);
        assert_eq!(record.address, 0x0800);
        assert_eq!(record.payload, vec![0xE8, 0x03]);
        assert_eq!(engine.counters().messages, 1);
        assert!(engine.pop_response().is_none());
    }

    #[test]
    fn test_bad_checksum_drops_frame() {
        let mut engine = synced_engine();
        engine.on_bytes(&[0x41, 0x07, 0x01, 0x01, 0x08, 0x00, 0x02, 0xE8, 0x03, 0x00]);
        assert_eq!(engine.state(), RxState::Sync);
        assert_eq!(engine.counters().errors, 1);
        assert_eq!(engine.counters().messages, 0);
        assert!(engine.pop_response().is_none());
    }

    #[test]
    fn test_bad_payload_length_drops_frame() {
        // length field says 5 (payload 0) but payload-length byte says 2
        let frame = [0x41, 0x05, 0x01, 0x01, 0x08, 0x00, 0x02, 0x11];
        let mut engine = synced_engine();
        engine.on_bytes(&frame);
        assert_eq!(engine.state(), RxState::Sync);
        assert_eq!(engine.counters().errors, 1);
        assert!(engine.pop_response().is_none());
    }

    #[test]
    fn test_request_read_emits_frame() {
        let mut engine = synced_engine();
        engine.request_read(0x0800, 2).unwrap();
        assert_eq!(
            engine.drain_tx(),
            vec![Bytes::copy_from_slice(&[
                0x41, 0x05, 0x00, 0x01, 0x08, 0x00, 0x02, 0x10
            ])]
        );
    }

    #[test]
    fn test_request_read_refused_when_not_synced() {
        let mut engine = ProtocolEngine::new();
        assert!(matches!(
            engine.request_read(0x0800, 2),
            Err(VitoError::NotSynced)
        ));
        engine.on_bytes(&[ENQ]);
        assert!(matches!(
            engine.request_read(0x0800, 2),
            Err(VitoError::NotSynced)
        ));
    }

    #[test]
    fn test_handshake_timeout_emits_eot_once_per_window() {
        let mut engine = ProtocolEngine::new();
        engine.on_bytes(&[0x00]); // leave Start, stay Unsync

        for _ in 0..HANDSHAKE_TIMEOUT_TICKS - 1 {
            engine.on_tick();
        }
        assert!(engine.drain_tx().is_empty());
        assert_eq!(engine.counters().timeouts, 0);

        engine.on_tick();
        assert_eq!(engine.drain_tx(), vec![Bytes::from_static(&[0x04])]);
        assert_eq!(engine.counters().timeouts, 1);
        assert_eq!(engine.state(), RxState::Unsync);

        // The window restarts; no further EOT until it elapses again
        for _ in 0..HANDSHAKE_TIMEOUT_TICKS - 1 {
            engine.on_tick();
        }
        assert!(engine.drain_tx().is_empty());
        engine.on_tick();
        assert_eq!(engine.drain_tx().len(), 1);
        assert_eq!(engine.counters().timeouts, 2);
    }

    #[test]
    fn test_sync_keepalive_after_idle() {
        let mut engine = synced_engine();

        for _ in 0..SYNC_KEEPALIVE_TICKS - 1 {
            engine.on_tick();
        }
        assert!(engine.drain_tx().is_empty());

        engine.on_tick();
        assert_eq!(engine.drain_tx(), vec![Bytes::from_static(&[0x16, 0x00, 0x00])]);
        assert_eq!(engine.state(), RxState::Sync);
        assert_eq!(engine.counters().timeouts, 0);
    }

    #[test]
    fn test_activity_resets_idle_window() {
        let mut engine = synced_engine();
        for _ in 0..SYNC_KEEPALIVE_TICKS - 1 {
            engine.on_tick();
        }
        engine.on_bytes(&[ACK]);
        engine.on_tick();
        assert!(engine.drain_tx().is_empty());
    }

    #[test]
    fn test_clear_rx_resets_counters_and_queue() {
        let mut engine = synced_engine();
        engine.on_bytes(&[ACK, 0x41, 0x07, 0x01, 0x01, 0x08, 0x00, 0x02, 0xE8, 0x03, 0xF6]);
        assert_eq!(engine.counters().acks, 1);
        assert_eq!(engine.counters().messages, 1);

        engine.clear_rx();
        assert_eq!(engine.counters(), RxCounters::default());
        assert!(engine.pop_response().is_none());
        assert_eq!(engine.state(), RxState::Sync);
    }

    #[test]
    fn test_state_is_always_a_known_variant() {
        // Arbitrary byte soup never wedges the machine
        let mut engine = ProtocolEngine::new();
        let soup: Vec<u8> = (0u16..512).map(|i| (i % 251) as u8).collect();
        for chunk in soup.chunks(7) {
            engine.on_bytes(chunk);
            engine.on_tick();
        }
        assert!(matches!(
            engine.state(),
            RxState::Start | RxState::Unsync | RxState::Startup | RxState::Sync | RxState::Busy
        ));
    }
}

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::{Result, VitoError};
use crate::protocol::engine::{ProtocolEngine, RxCounters, TICK_INTERVAL};
use crate::protocol::telegram::{hexlify, ResponseRecord};
use crate::protocol::wire::EOT;

/// How many times [`OptolinkLink::query`] inspects the engine before
/// giving up on an answer
pub const READ_ATTEMPTS: u32 = 10;

/// Pause between inspections; tuning parameter, the controller usually
/// answers within two or three windows
pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the Optolink serial connection
///
/// Framing is fixed at 8 data bits, even parity, 2 stop bits; only the
/// baud rate is configurable and no known controller deviates from 4800.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub baud_rate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { baud_rate: 4800 }
    }
}

/// Handle to a running Optolink connection
///
/// Cheap to share behind an `Arc`; the polling loop and the HTTP endpoint
/// both issue requests through [`OptolinkLink::query`], which serializes
/// them on a single cooperative lock.
pub struct OptolinkLink {
    engine: Arc<Mutex<ProtocolEngine>>,
    tx_out: UnboundedSender<Bytes>,
    query_lock: tokio::sync::Mutex<()>,
}

impl OptolinkLink {
    /// Open the serial device and start the RX/TX/tick tasks
    pub async fn open(device: &str, config: LinkConfig) -> Result<Self> {
        tracing::info!("Opening Optolink connection on {}", device);

        let port = tokio_serial::new(device, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .open_native_async()
            .map_err(VitoError::Serial)?;

        let (rx_half, tx_half) = tokio::io::split(port);
        let (tx_out, tx_in) = mpsc::unbounded_channel();
        let engine = Arc::new(Mutex::new(ProtocolEngine::new()));

        tokio::spawn(tx_task(tx_half, tx_in));
        tokio::spawn(rx_task(rx_half, Arc::clone(&engine), tx_out.clone()));
        tokio::spawn(tick_task(Arc::clone(&engine), tx_out.clone()));

        // Kick the controller into a fresh handshake
        let _ = tx_out.send(Bytes::from_static(&[EOT]));

        Ok(Self {
            engine,
            tx_out,
            query_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Read `expected_len` bytes at data point address `addr`
    ///
    /// The one correlation primitive exposed to callers: the receive side
    /// is cleared, the request submitted, and the engine inspected at
    /// [`READ_POLL_INTERVAL`] until an answer, a NAK, a protocol error, or
    /// the attempt budget runs out. Because the whole sequence holds the
    /// query lock and `clear_rx` empties the queue first, the next
    /// response-shaped telegram is the one being awaited; an address or
    /// length mismatch is a protocol failure and aborts immediately.
    pub async fn query(&self, addr: u16, expected_len: u8) -> Result<ResponseRecord> {
        let _guard = self.query_lock.lock().await;

        {
            let mut engine = self.engine.lock().unwrap();
            engine.clear_rx();
            engine.request_read(addr, expected_len)?;
            let frames = engine.drain_tx();
            drop(engine);
            self.send_frames(frames);
        }

        for _ in 0..READ_ATTEMPTS {
            tokio::time::sleep(READ_POLL_INTERVAL).await;

            let mut engine = self.engine.lock().unwrap();
            let counters = engine.counters();
            if counters.naks > 0 {
                return Err(VitoError::Nak);
            }
            if counters.timeouts > 0 {
                return Err(VitoError::Timeout);
            }
            if counters.errors > 0 {
                return Err(VitoError::Protocol(
                    "framing error while waiting for answer".to_string(),
                ));
            }
            if let Some(record) = engine.pop_response() {
                if record.address != addr {
                    return Err(VitoError::AddressMismatch {
                        expected: addr,
                        actual: record.address,
                    });
                }
                if record.payload.len() != expected_len as usize {
                    return Err(VitoError::LengthMismatch {
                        expected: expected_len as usize,
                        actual: record.payload.len(),
                    });
                }
                return Ok(record);
            }
        }

        Err(VitoError::Timeout)
    }

    /// Snapshot of the engine's receive counters
    pub fn counters(&self) -> RxCounters {
        self.engine.lock().unwrap().counters()
    }

    fn send_frames(&self, frames: Vec<Bytes>) {
        for frame in frames {
            if self.tx_out.send(frame).is_err() {
                tracing::warn!("TX task is gone, dropping outbound frame");
            }
        }
    }

    /// Link backed by a bare channel instead of a serial port; the test
    /// feeds inbound bytes itself and asserts on the outbound frames.
    #[cfg(test)]
    fn with_channel() -> (Self, UnboundedReceiver<Bytes>) {
        let (tx_out, tx_in) = mpsc::unbounded_channel();
        (
            Self {
                engine: Arc::new(Mutex::new(ProtocolEngine::new())),
                tx_out,
                query_lock: tokio::sync::Mutex::new(()),
            },
            tx_in,
        )
    }

    #[cfg(test)]
    fn feed(&self, bytes: &[u8]) {
        let frames = {
            let mut engine = self.engine.lock().unwrap();
            engine.on_bytes(bytes);
            engine.drain_tx()
        };
        self.send_frames(frames);
    }
}

/// Read chunks from the serial port and feed them to the engine
///
/// Chunked reads keep the syscall count down; at 4800 baud a telegram
/// usually arrives in one or two chunks. Handshake replies queued by the
/// engine are forwarded to the TX task with the lock already released.
async fn rx_task(
    mut port: ReadHalf<SerialStream>,
    engine: Arc<Mutex<ProtocolEngine>>,
    tx_out: UnboundedSender<Bytes>,
) {
    let mut buf = [0u8; 256];

    tracing::debug!("RX task started");

    loop {
        match port.read(&mut buf).await {
            Ok(0) => {
                tracing::info!("Serial port closed");
                break;
            }
            Ok(n) => {
                let frames = {
                    let mut engine = engine.lock().unwrap();
                    engine.on_bytes(&buf[..n]);
                    engine.drain_tx()
                };
                for frame in frames {
                    if tx_out.send(frame).is_err() {
                        tracing::debug!("TX task gone, RX task exiting");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!("Serial read error: {}", e);
                break;
            }
        }
    }
}

/// Drain the outbound channel onto the serial port, one frame per write
async fn tx_task(mut port: WriteHalf<SerialStream>, mut frames: UnboundedReceiver<Bytes>) {
    tracing::debug!("TX task started");

    while let Some(frame) = frames.recv().await {
        tracing::trace!("TX: {}", hexlify(&frame));
        if let Err(e) = port.write_all(&frame).await {
            tracing::error!("Serial write error: {}", e);
            break;
        }
        if let Err(e) = port.flush().await {
            tracing::error!("Serial flush error: {}", e);
            break;
        }
    }

    tracing::debug!("TX task exited");
}

/// Drive the engine's timeout handling every [`TICK_INTERVAL`]
async fn tick_task(engine: Arc<Mutex<ProtocolEngine>>, tx_out: UnboundedSender<Bytes>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let frames = {
            let mut engine = engine.lock().unwrap();
            engine.on_tick();
            engine.drain_tx()
        };
        for frame in frames {
            if tx_out.send(frame).is_err() {
                tracing::debug!("TX task gone, tick task exiting");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::{ENQ, NAK};

    const ANSWER_0800: [u8; 10] = [0x41, 0x07, 0x01, 0x01, 0x08, 0x00, 0x02, 0xE8, 0x03, 0xF6];

    fn synced_link() -> (Arc<OptolinkLink>, UnboundedReceiver<Bytes>) {
        let (link, mut tx) = OptolinkLink::with_channel();
        link.feed(&[ENQ]);
        link.feed(&[ENQ]);
        assert_eq!(tx.try_recv().unwrap(), Bytes::from_static(&[0x04]));
        assert_eq!(tx.try_recv().unwrap(), Bytes::from_static(&[0x16, 0x00, 0x00]));
        (Arc::new(link), tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_returns_matching_record() {
        let (link, mut tx) = synced_link();

        let worker = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.query(0x0800, 2).await })
        };
        tokio::task::yield_now().await;

        // The 8-byte read request must be on the wire before any answer
        assert_eq!(
            tx.try_recv().unwrap(),
            Bytes::copy_from_slice(&[0x41, 0x05, 0x00, 0x01, 0x08, 0x00, 0x02, 0x10])
        );

        link.feed(&ANSWER_0800);

        let record = worker.await.unwrap().unwrap();
        assert_eq!(record.address, 0x0800);
        assert_eq!(record.payload, vec![0xE8, 0x03]);

        // The queue was drained by the query; nothing is left over
        assert!(link.engine.lock().unwrap().pop_response().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_not_synced() {
        let (link, _tx) = OptolinkLink::with_channel();
        assert!(matches!(
            link.query(0x0800, 2).await,
            Err(VitoError::NotSynced)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_nak() {
        let (link, _tx) = synced_link();

        let worker = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.query(0x0800, 2).await })
        };
        tokio::task::yield_now().await;

        link.feed(&[NAK]);
        assert!(matches!(worker.await.unwrap(), Err(VitoError::Nak)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_times_out_without_answer() {
        let (link, _tx) = synced_link();
        let started = tokio::time::Instant::now();
        assert!(matches!(
            link.query(0x0800, 2).await,
            Err(VitoError::Timeout)
        ));
        // Ten poll windows elapse before giving up
        assert_eq!(
            started.elapsed(),
            READ_POLL_INTERVAL * READ_ATTEMPTS
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_address_mismatch_aborts() {
        let (link, _tx) = synced_link();

        let worker = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.query(0x0801, 2).await })
        };
        tokio::task::yield_now().await;

        link.feed(&ANSWER_0800);
        assert!(matches!(
            worker.await.unwrap(),
            Err(VitoError::AddressMismatch {
                expected: 0x0801,
                actual: 0x0800
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_length_mismatch_aborts() {
        let (link, _tx) = synced_link();

        let worker = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.query(0x0800, 1).await })
        };
        tokio::task::yield_now().await;

        link.feed(&ANSWER_0800);
        assert!(matches!(
            worker.await.unwrap(),
            Err(VitoError::LengthMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_protocol_error_on_bad_frame() {
        let (link, _tx) = synced_link();

        let worker = {
            let link = Arc::clone(&link);
            tokio::spawn(async move { link.query(0x0800, 2).await })
        };
        tokio::task::yield_now().await;

        let mut corrupted = ANSWER_0800;
        corrupted[9] = 0x00;
        link.feed(&corrupted);
        assert!(matches!(
            worker.await.unwrap(),
            Err(VitoError::Protocol(_))
        ));
    }
}

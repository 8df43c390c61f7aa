//! Optolink data logger for Viessmann Vitotronic heating controllers
//!
//! This library polls a Vitotronic controller over the infrared Optolink
//! serial interface (4800 baud, 8E2), decodes typed data points, and
//! forwards them to an InfluxDB time-series sink.
//!
//! # Architecture
//!
//! The library is organized into three layers:
//!
//! - **Protocol Layer** (`protocol`): Pure state machines for link
//!   synchronization, telegram framing, and checksum calculation. No I/O;
//!   outbound frames are queued for the transport to drain.
//!
//! - **Transport Layer** (`transport`): Owns the serial port, runs the
//!   RX/TX/tick tasks, and exposes a single-outstanding-request query
//!   primitive with unambiguous response correlation.
//!
//! - **Collector Layer** (`decode`, `varlist`, `poller`, `sink`, `http`):
//!   Typed payload decoding, the variable-list file, the periodic polling
//!   loop, the InfluxDB write client, and an optional ad-hoc HTTP query
//!   endpoint.

// Module declarations
pub mod decode;
pub mod error;
pub mod http;
pub mod poller;
pub mod protocol;
pub mod sink;
pub mod transport;
pub mod varlist;

// Public API exports
pub use error::{Result, VitoError};
pub use protocol::engine::{ProtocolEngine, RxCounters, RxState};
pub use protocol::telegram::ResponseRecord;
pub use transport::link::{LinkConfig, OptolinkLink};

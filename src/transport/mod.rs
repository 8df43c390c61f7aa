//! Transport layer for serial communication and request correlation
//!
//! This module owns the physical Optolink serial port and drives the
//! protocol engine from three cooperative tasks:
//!
//! - RX task: reads byte chunks from the port and feeds them to the engine
//! - TX task: drains the outbound frame channel, one atomic write per frame
//! - tick task: advances the engine's timeout counter every 500 ms
//!
//! Response correlation relies on a single cooperative lock around the
//! whole clear/request/await sequence, so at most one request is ever in
//! flight on the wire.

pub mod link;

pub use link::{LinkConfig, OptolinkLink};

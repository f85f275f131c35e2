//! Host side of the RP2040 motor and power controller link.
//!
//! The controller speaks a small framed protocol over a serial-style byte
//! stream. Commands go out as fixed 5-byte frames, telemetry comes back as
//! variable-length frames with a little-endian length header. This crate
//! provides the codec, a resynchronizing frame assembler, the telemetry
//! decoder, and a scheduler that keeps exactly one request in flight.

mod config;
pub use config::*;

mod error;
pub use error::*;

pub mod protocol;

mod queue;
pub use queue::*;

mod resync;
pub use resync::*;

mod scheduler;
pub use scheduler::*;

mod subscriber;
pub use subscriber::*;

pub mod transport;
pub use transport::{Transport, TransportError};

//! Core structures of the RSocket protocol: the bit-exact frame codec,
//! flag bits, payloads and the protocol error domain.
//!
//! Everything above the frame layer (stream multiplexing, backpressure,
//! liveness) lives in the `rsmux` crate.

/// Error module for the protocol error domain and codec faults
pub mod error;
/// The frame codec: types, flags and the wire layout
pub mod frame;
/// Opaque metadata/data payload pairs
pub mod payload;

pub use error::{Error, FrameError};
pub use frame::{Flags, Frame, FrameDecoder, FrameHeader, FrameType};
pub use payload::Payload;

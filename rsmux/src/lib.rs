//! Responder-side multiplexing for the RSocket protocol.
//!
//! Inbound frames are demultiplexed by stream id and drive per-stream
//! state machines for the four interaction models; every outbound frame,
//! whatever its stream, funnels through one queue the transport drains.
//! Peer credit gates each stream's production, and a keep-alive
//! coordinator enforces connection liveness on its own timer.

/// The inbound payload stream of a channel interaction
pub mod channel;
/// Connection assembly and the inbound drive loop
pub mod connection;
/// Credit-based flow control
pub mod credit;
/// The user-facing handler contract
pub mod handler;
/// Chain-of-responsibility decoration of the responder
pub mod interceptor;
/// Connection liveness probes and timeout
pub mod keepalive;
/// The stream id registries
pub mod registry;
/// Inbound frame dispatch and the per-interaction state machines
pub mod responder;

pub use connection::Connection;
pub use handler::{ErrorConsumer, PayloadStream, RSocket};
pub use interceptor::{InterceptorRegistry, ResponderInterceptor};
pub use keepalive::KeepAlive;
pub use responder::{ConnectionState, Responder};

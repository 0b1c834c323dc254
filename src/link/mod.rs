//! Host side of the display link protocol.
//!
//! - [`control`] control octets shared with the device firmware
//! - [`codec`] sync, command and message frame layouts
//! - [`rx_buffer`] blocking receive buffer fed by the transport
//! - [`transport`] serial and scripted transports
//! - [`engine`] the protocol state machine driving all of the above
pub mod codec;
pub mod control;
pub mod engine;
pub mod error;
pub mod rx_buffer;
pub mod transport;

pub use engine::{Delivery, EnginePhase, ProtocolEngine};
pub use error::{LinkError, LinkResult};
pub use rx_buffer::ReceiveBuffer;
#[cfg(feature = "serial")]
pub use transport::SerialTransport;
pub use transport::{MockProbe, MockTransport, Transport};

/// Messages from the application side to the engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Shutdown,
}

//! INDI Transport Layer
//!
//! Byte-stream transport for INDI clients. INDI servers speak XML over a
//! single TCP connection (port 7624 by default); this crate owns the socket
//! and hands raw chunks to the decoder.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{probe, TcpConfig, TcpReceiver, TcpSender, TcpTransport};
pub use traits::{TransportEvent, TransportReceiver, TransportSender};

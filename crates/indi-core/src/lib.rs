//! INDI Core
//!
//! Protocol primitives for INDI, the XML instrument-control protocol.
//!
//! This crate provides:
//! - Element model and command builders ([`IndiElement`], [`Tag`])
//! - Incremental stream decoding ([`StreamDecoder`])
//! - The device/property mirror ([`Registry`])
//! - Inbound element routing ([`dispatch()`])
//! - Typed client events ([`Event`], [`EventKind`])

pub mod codec;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod registry;
pub mod types;
pub mod xml;

pub use codec::{IndiElement, Tag, INDI_PROTOCOL_VERSION};
pub use decoder::StreamDecoder;
pub use dispatch::dispatch;
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use registry::{BlobValue, Device, Element, Property, Registry, Value};
pub use types::*;

/// Default INDI server port
pub const DEFAULT_PORT: u16 = 7624;

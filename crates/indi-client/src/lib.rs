//! INDI Client Library
//!
//! High-level async client for the INDI instrument-control protocol.
//!
//! # Example
//!
//! ```ignore
//! use indi_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::connect_to("localhost", 7624).await?;
//!
//!     // Watch exposures
//!     client.subscribe(EventKind::Updated(VectorKind::Number), |event| {
//!         println!("{:?}", event);
//!     });
//!
//!     client.get_properties(None, None).await?;
//!     client
//!         .send_new_number("CCD Simulator", "CCD_EXPOSURE", [("CCD_EXPOSURE_VALUE", 2.0)])
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod client;
pub mod error;
pub mod events;
mod liveness;

pub use builder::{ClientBuilder, ClientConfig};
pub use client::Client;
pub use error::{ClientError, Result};
pub use events::{EventBus, EventCallback, SubscriptionId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::{ClientBuilder, ClientConfig};
    pub use crate::client::Client;
    pub use crate::error::{ClientError, Result};
    pub use indi_core::{BlobMode, Device, Event, EventKind, Interface, SwitchState, VectorKind};
}

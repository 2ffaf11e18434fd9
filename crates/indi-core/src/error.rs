//! Error types for the INDI core

use crate::VectorKind;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol-level errors raised while decoding or applying elements
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Element has no `device` attribute and is not a message
    #[error("{tag} element has no device attribute")]
    MissingDevice { tag: String },

    /// Element has no `name` attribute where one is required
    #[error("{tag} element for device {device} has no name attribute")]
    MissingName { tag: String, device: String },

    /// Element kind this client does not handle
    #[error("unexpected element: {0}")]
    UnexpectedElement(String),

    /// Definition or update disagrees with the kind already registered
    #[error("property {device}.{property} is {existing:?}, got {incoming:?}")]
    KindMismatch {
        device: String,
        property: String,
        existing: VectorKind,
        incoming: VectorKind,
    },

    /// Number element whose text is neither decimal nor sexagesimal
    #[error("element {element} has invalid number {value:?}")]
    InvalidNumber { element: String, value: String },

    /// Markup the tokenizer could not make sense of
    #[error("malformed xml: {0}")]
    MalformedXml(String),
}

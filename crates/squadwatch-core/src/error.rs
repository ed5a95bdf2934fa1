//! Error types shared by the squadwatch crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding upstream payloads or reference data.
#[derive(Error, Debug)]
pub enum Error {
    /// A payload field is present but has an unusable shape.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hex decoding error.
    #[error("hex decode error: {0}")]
    HexDecode(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A tag id that the tag catalog doesn't know about.
    #[error("unknown squadron tag {0}")]
    UnknownTag(i64),
}

//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding, decoding or validating documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// The document is larger than the ruleset allows.
    #[error("document too large: {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Encoded size of the document.
        size: usize,
        /// Maximum permitted size.
        limit: usize,
    },

    /// The document nests deeper than the ruleset allows.
    #[error("document nesting exceeds maximum depth of {limit}")]
    TooDeep {
        /// Maximum permitted depth.
        limit: usize,
    },

    /// Bytes remain after the top-level value.
    #[error("{count} trailing bytes after document")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// Invalid document structure.
    #[error("invalid document structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}

//! # clonedb codec
//!
//! CBOR document model and structural validation for clonedb.
//!
//! Documents travel from a remote source as opaque serialized bytes. Before
//! a document is stored locally it is validated against the latest
//! structural ruleset:
//!
//! - The bytes hold exactly one CBOR value, with no trailing bytes
//! - The value is a map whose keys are unique text strings
//! - Nesting does not exceed the configured depth
//! - The encoded size does not exceed the configured limit
//!
//! ## Usage
//!
//! ```
//! use clonedb_codec::{Document, DocumentValidator, Value};
//!
//! let doc = Document::from_fields(vec![
//!     ("_id".to_string(), Value::Integer(1i64.into())),
//!     ("name".to_string(), Value::Text("tanzanite".to_string())),
//! ])
//! .unwrap();
//!
//! let validated = DocumentValidator::default().validate(doc.raw()).unwrap();
//! assert_eq!(validated.id(), doc.id());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod validate;

pub use ciborium::Value;
pub use document::{
    encode_compound_key, encode_key, encode_value, Document, RawDocument, ID_FIELD,
};
pub use error::{CodecError, CodecResult};
pub use validate::{DocumentValidator, ValidationRules, MAX_DOCUMENT_DEPTH, MAX_DOCUMENT_SIZE};

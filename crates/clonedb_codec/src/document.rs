//! Document model.
//!
//! A [`Document`] pairs the serialized bytes received from a remote source
//! with the decoded top-level fields. The bytes are kept verbatim so that a
//! cloned document is stored exactly as the source delivered it.

use crate::error::{CodecError, CodecResult};
use bytes::Bytes;
use ciborium::Value;

/// Name of the identity field every stored document is keyed by.
pub const ID_FIELD: &str = "_id";

/// A serialized, not yet validated document as delivered by a cursor.
pub type RawDocument = Bytes;

/// A validated document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    raw: Bytes,
    fields: Vec<(String, Value)>,
}

impl Document {
    /// Builds a document from ordered fields, encoding it to CBOR.
    ///
    /// Field order is preserved in the encoding.
    pub fn from_fields(fields: Vec<(String, Value)>) -> CodecResult<Self> {
        let value = Value::Map(
            fields
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                .collect(),
        );
        let raw = encode_value(&value)?;
        Ok(Self {
            raw: Bytes::from(raw),
            fields,
        })
    }

    /// Assembles a document from already decoded parts.
    ///
    /// Callers must guarantee that `fields` is the decoding of `raw`.
    pub(crate) fn from_parts(raw: Bytes, fields: Vec<(String, Value)>) -> Self {
        Self { raw, fields }
    }

    /// Returns the serialized form.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the top-level fields in encoded order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Looks up a top-level field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(k, v)| (k == name).then_some(v))
    }

    /// Looks up a dotted path such as `address.city`.
    ///
    /// Intermediate values must be maps with text keys; arrays are not
    /// traversed.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Map(entries) => entries.iter().find_map(|(k, v)| match k {
                    Value::Text(t) if t == part => Some(v),
                    _ => None,
                })?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns the identity field value, if present.
    #[must_use]
    pub fn id(&self) -> Option<&Value> {
        self.get(ID_FIELD)
    }
}

/// Encodes a single value to CBOR.
pub fn encode_value(value: &Value) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Encodes a value into a byte key usable for equality and ordering.
///
/// Two values produce the same key iff they encode identically, which is
/// the comparison used for identity and index keys.
pub fn encode_key(value: &Value) -> CodecResult<Vec<u8>> {
    encode_value(value)
}

/// Encodes a compound key from several optional values.
///
/// Missing values are keyed as null so that documents lacking an indexed
/// field still collide with each other under a unique index.
pub fn encode_compound_key(values: &[Option<&Value>]) -> CodecResult<Vec<u8>> {
    let array = Value::Array(
        values
            .iter()
            .map(|v| v.cloned().unwrap_or(Value::Null))
            .collect(),
    );
    encode_value(&array)
}

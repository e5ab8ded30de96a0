//! Structural validation of serialized documents.
//!
//! Every document streamed from a remote source is checked against a
//! [`ValidationRules`] set before it is stored. Validation is structural
//! only: it says nothing about collection-level validators.

use crate::document::{Document, RawDocument};
use crate::error::{CodecError, CodecResult};
use ciborium::Value;
use std::collections::HashSet;

/// Maximum encoded document size accepted by the latest ruleset.
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Maximum nesting depth accepted by the latest ruleset.
pub const MAX_DOCUMENT_DEPTH: usize = 100;

/// A structural validation ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    /// Maximum encoded size in bytes.
    pub max_size: usize,
    /// Maximum nesting depth of maps and arrays (top level is depth 1).
    pub max_depth: usize,
    /// Whether nested map keys must be text, like top-level keys.
    pub text_keys_only: bool,
    /// Whether NaN and infinite floats are rejected.
    pub reject_non_finite_floats: bool,
}

impl ValidationRules {
    /// The latest ruleset. Non-finite floats are accepted so that any
    /// numeric data the source could store can be cloned.
    #[must_use]
    pub const fn latest() -> Self {
        Self {
            max_size: MAX_DOCUMENT_SIZE,
            max_depth: MAX_DOCUMENT_DEPTH,
            text_keys_only: true,
            reject_non_finite_floats: false,
        }
    }

    /// Sets the maximum encoded size.
    #[must_use]
    pub const fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Sets the maximum nesting depth.
    #[must_use]
    pub const fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::latest()
    }
}

/// Validates raw documents and decodes them into [`Document`]s.
#[derive(Debug, Clone, Default)]
pub struct DocumentValidator {
    rules: ValidationRules,
}

impl DocumentValidator {
    /// Creates a validator for the given ruleset.
    #[must_use]
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    /// Returns the ruleset in use.
    #[must_use]
    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Validates `raw` and returns the decoded document.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a single well-formed CBOR map
    /// satisfying the ruleset.
    pub fn validate(&self, raw: &RawDocument) -> CodecResult<Document> {
        if raw.len() > self.rules.max_size {
            return Err(CodecError::TooLarge {
                size: raw.len(),
                limit: self.rules.max_size,
            });
        }

        let mut input: &[u8] = raw;
        let value: Value = ciborium::de::from_reader(&mut input)
            .map_err(|e| CodecError::decoding_failed(e.to_string()))?;
        if !input.is_empty() {
            return Err(CodecError::TrailingBytes { count: input.len() });
        }

        let Value::Map(entries) = value else {
            return Err(CodecError::invalid_structure("top-level value is not a map"));
        };

        let mut seen = HashSet::with_capacity(entries.len());
        let mut fields = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let Value::Text(name) = key else {
                return Err(CodecError::invalid_structure("top-level key is not text"));
            };
            if !seen.insert(name.clone()) {
                return Err(CodecError::invalid_structure(format!(
                    "duplicate field name '{name}'"
                )));
            }
            self.check_value(&value, 2)?;
            fields.push((name, value));
        }

        Ok(Document::from_parts(raw.clone(), fields))
    }

    fn check_value(&self, value: &Value, depth: usize) -> CodecResult<()> {
        match value {
            Value::Map(entries) => {
                self.check_depth(depth)?;
                let mut seen = HashSet::with_capacity(entries.len());
                for (key, nested) in entries {
                    match key {
                        Value::Text(name) => {
                            if !seen.insert(name.as_str()) {
                                return Err(CodecError::invalid_structure(format!(
                                    "duplicate field name '{name}'"
                                )));
                            }
                        }
                        _ if self.rules.text_keys_only => {
                            return Err(CodecError::invalid_structure("nested key is not text"));
                        }
                        other => self.check_value(other, depth + 1)?,
                    }
                    self.check_value(nested, depth + 1)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                self.check_depth(depth)?;
                items
                    .iter()
                    .try_for_each(|item| self.check_value(item, depth + 1))
            }
            Value::Tag(_, inner) => self.check_value(inner, depth),
            Value::Float(f) if self.rules.reject_non_finite_floats && !f.is_finite() => Err(
                CodecError::invalid_structure("non-finite float value"),
            ),
            _ => Ok(()),
        }
    }

    fn check_depth(&self, depth: usize) -> CodecResult<()> {
        if depth > self.rules.max_depth {
            Err(CodecError::TooDeep {
                limit: self.rules.max_depth,
            })
        } else {
            Ok(())
        }
    }
}

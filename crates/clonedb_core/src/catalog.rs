//! Catalog metadata exchanged with the remote source and the local
//! storage engine: collection identities, options and index specs.

use clonedb_codec::Value;
use std::fmt;
use uuid::Uuid;

/// Name of the identity index present on every collection.
pub const IDENTITY_INDEX_NAME: &str = "_id_";

/// An options document in the order the source reported it.
pub type OptionsDocument = Vec<(String, Value)>;

/// Stable unique identity assigned to a collection at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionUuid(Uuid);

impl CollectionUuid {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bytes(bytes) => Uuid::from_slice(bytes)
                .map(Self)
                .map_err(|e| format!("invalid uuid bytes: {e}")),
            Value::Text(text) => Uuid::parse_str(text)
                .map(Self)
                .map_err(|e| format!("invalid uuid string: {e}")),
            Value::Tag(_, inner) => Self::from_value(inner),
            _ => Err("uuid must be bytes or text".to_string()),
        }
    }
}

impl fmt::Display for CollectionUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sort direction of one indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexDirection {
    /// Ascending order.
    Ascending,
    /// Descending order.
    Descending,
}

/// One field of an index key pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKeyField {
    /// Dotted field path.
    pub field: String,
    /// Sort direction.
    pub direction: IndexDirection,
}

/// Specification of an index on a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    /// Index name, unique per collection.
    pub name: String,
    /// Key pattern.
    pub key: Vec<IndexKeyField>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Whether documents missing every key field are left out.
    pub sparse: bool,
}

impl IndexSpec {
    /// Creates an index specification with an empty key pattern.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: Vec::new(),
            unique: false,
            sparse: false,
        }
    }

    /// The default identity index.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(IDENTITY_INDEX_NAME)
            .ascending(clonedb_codec::ID_FIELD)
            .unique()
    }

    /// Appends an ascending key field.
    #[must_use]
    pub fn ascending(mut self, field: impl Into<String>) -> Self {
        self.key.push(IndexKeyField {
            field: field.into(),
            direction: IndexDirection::Ascending,
        });
        self
    }

    /// Appends a descending key field.
    #[must_use]
    pub fn descending(mut self, field: impl Into<String>) -> Self {
        self.key.push(IndexKeyField {
            field: field.into(),
            direction: IndexDirection::Descending,
        });
        self
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Makes this a sparse index.
    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Returns true if this is the identity index.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.name == IDENTITY_INDEX_NAME
    }

    /// Returns true if both specs define the same index, ignoring names.
    #[must_use]
    pub fn is_equivalent(&self, other: &IndexSpec) -> bool {
        self.key == other.key && self.unique == other.unique && self.sparse == other.sparse
    }
}

/// Returns the spec named exactly `_id_`, if any.
#[must_use]
pub fn find_identity_index(specs: &[IndexSpec]) -> Option<&IndexSpec> {
    specs.iter().find(|spec| spec.is_identity())
}

/// Typed view over a collection options document.
///
/// Options the engine does not interpret are kept in `extra` and passed
/// through to the storage engine unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionOptions {
    /// Whether the collection is capped.
    pub capped: bool,
    /// Maximum size in bytes of a capped collection.
    pub size: Option<u64>,
    /// Maximum document count of a capped collection.
    pub max: Option<u64>,
    /// Collection-level document validator.
    pub validator: Option<Value>,
    /// Identity to create the collection with.
    pub uuid: Option<CollectionUuid>,
    /// Uninterpreted options.
    pub extra: OptionsDocument,
}

impl CollectionOptions {
    /// Parses an options document.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed option.
    pub fn parse(doc: &[(String, Value)]) -> Result<Self, String> {
        let mut options = Self::default();
        for (name, value) in doc {
            match name.as_str() {
                "capped" => {
                    options.capped = match value {
                        Value::Bool(b) => *b,
                        _ => return Err("'capped' must be a boolean".into()),
                    }
                }
                "size" => options.size = Some(non_negative(name, value)?),
                "max" => options.max = Some(non_negative(name, value)?),
                "validator" => match value {
                    Value::Map(_) => options.validator = Some(value.clone()),
                    _ => return Err("'validator' must be a document".into()),
                },
                "uuid" => options.uuid = Some(CollectionUuid::from_value(value)?),
                _ => options.extra.push((name.clone(), value.clone())),
            }
        }
        if options.capped && options.size.is_none() {
            return Err("capped collections require 'size'".into());
        }
        Ok(options)
    }
}

fn non_negative(name: &str, value: &Value) -> Result<u64, String> {
    match value {
        Value::Integer(i) => u64::try_from(*i).map_err(|_| format!("'{name}' must be non-negative")),
        _ => Err(format!("'{name}' must be an integer")),
    }
}

/// Kind of entry in a remote catalog listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    /// A regular collection.
    Collection,
    /// A view; never cloned.
    View,
}

/// The `info` block of a catalog listing entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionInfoBlock {
    /// The collection's stable identity on the source.
    pub uuid: Option<CollectionUuid>,
    /// Whether the source reports the collection as read-only.
    pub read_only: bool,
}

/// One collection as described by the remote catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCollectionDescriptor {
    /// Collection name, without the database.
    pub name: String,
    /// Listing entry kind.
    pub kind: CollectionKind,
    /// Creation options as reported by the source.
    pub options: OptionsDocument,
    /// Identity and flags.
    pub info: CollectionInfoBlock,
    /// Identity index spec, when embedded in the listing.
    pub id_index: Option<IndexSpec>,
}

impl RemoteCollectionDescriptor {
    /// Creates a descriptor for a regular collection with no options.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CollectionKind::Collection,
            options: Vec::new(),
            info: CollectionInfoBlock::default(),
            id_index: None,
        }
    }

    /// Sets the identity reported in the info block.
    #[must_use]
    pub fn with_uuid(mut self, uuid: CollectionUuid) -> Self {
        self.info.uuid = Some(uuid);
        self
    }

    /// Sets the options document.
    #[must_use]
    pub fn with_options(mut self, options: OptionsDocument) -> Self {
        self.options = options;
        self
    }

    /// Sets the embedded identity index spec.
    #[must_use]
    pub fn with_id_index(mut self, spec: IndexSpec) -> Self {
        self.id_index = Some(spec);
        self
    }
}

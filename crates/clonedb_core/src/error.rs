//! Error types for the cloning engine.

use crate::catalog::CollectionUuid;
use crate::fail_point::FailPointSite;
use crate::namespace::Namespace;
use crate::remote::RemoteError;
use crate::storage::StorageError;
use thiserror::Error;

/// Result type for clone operations.
pub type CloneResult<T> = Result<T, CloneError>;

/// Errors that abort a clone.
///
/// Every variant is fatal to the whole multi-collection operation. Write
/// conflicts never surface here: they are retried until they clear or the
/// operation is cancelled.
#[derive(Debug, Error)]
pub enum CloneError {
    /// The remote source could not be reached or refused authentication.
    #[error("cannot connect to {address}: {source}")]
    Connection {
        /// Address of the remote source.
        address: String,
        /// Underlying remote failure.
        #[source]
        source: RemoteError,
    },

    /// A remote call failed after the connection was established.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// This node stopped accepting writes for the namespace.
    #[error("not primary while cloning {target}: {context}")]
    RoleChanged {
        /// Database or namespace being written.
        target: String,
        /// Where the role loss was detected.
        context: &'static str,
    },

    /// The target database was dropped while the lock was released.
    #[error("database {db} dropped while cloning")]
    DatabaseDropped {
        /// Database name.
        db: String,
    },

    /// The target collection was dropped while the lock was released.
    #[error("collection {nss} dropped while cloning")]
    CollectionDropped {
        /// The dropped namespace.
        nss: Namespace,
    },

    /// An unsharded collection with the same namespace already exists.
    #[error("unsharded collection with same namespace {nss} already exists")]
    NamespaceConflict {
        /// The conflicting namespace.
        nss: Namespace,
    },

    /// A sharded collection exists locally under a different identity.
    #[error(
        "sharded collection with same namespace {nss} already exists, but identities differ \
         (existing {existing}, remote {remote})"
    )]
    IdentityConflict {
        /// The conflicting namespace.
        nss: Namespace,
        /// Identity of the local collection.
        existing: CollectionUuid,
        /// Identity reported by the remote source.
        remote: CollectionUuid,
    },

    /// A document failed structural validation.
    #[error("found corrupt document in {nss}: {reason}")]
    CorruptData {
        /// Namespace being copied.
        nss: Namespace,
        /// Validation failure.
        reason: String,
    },

    /// Building secondary indexes failed; partial index state was removed.
    #[error("index build on {nss} failed: {source}")]
    IndexBuild {
        /// Namespace whose indexes were being built.
        nss: Namespace,
        /// Underlying storage failure.
        #[source]
        source: StorageError,
    },

    /// The operation was cancelled by the caller.
    #[error("clone cancelled")]
    Cancelled,

    /// The requested clone is not permitted.
    #[error("illegal operation: {message}")]
    IllegalOperation {
        /// Why the operation was refused.
        message: String,
    },

    /// Remote collection options could not be parsed.
    #[error("invalid options for {nss}: {message}")]
    InvalidOptions {
        /// Namespace whose options were rejected.
        nss: Namespace,
        /// Parse failure.
        message: String,
    },

    /// A namespace may not be created by a client.
    #[error("{message}")]
    InvalidNamespace {
        /// Naming rule violation.
        message: String,
    },

    /// A fail point forced the operation to fail.
    #[error("operation failed due to fail point {site:?}")]
    FailPoint {
        /// The triggered site.
        site: FailPointSite,
    },

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CloneError {
    /// Creates a role-changed error.
    pub fn role_changed(target: impl ToString, context: &'static str) -> Self {
        Self::RoleChanged {
            target: target.to_string(),
            context,
        }
    }

    /// Creates a corrupt data error.
    pub fn corrupt_data(nss: &Namespace, reason: impl ToString) -> Self {
        Self::CorruptData {
            nss: nss.clone(),
            reason: reason.to_string(),
        }
    }

    /// Creates an illegal operation error.
    pub fn illegal_operation(message: impl Into<String>) -> Self {
        Self::IllegalOperation {
            message: message.into(),
        }
    }

    /// Returns true if the caller cancelled the operation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CloneError::Cancelled)
    }

    /// Returns true for the storage engine's write-conflict signal.
    #[must_use]
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, CloneError::Storage(StorageError::WriteConflict { .. }))
    }
}

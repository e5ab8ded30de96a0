//! Remote source contract.
//!
//! A [`RemoteConnector`] opens a [`RemoteSource`] session against an
//! [`Endpoint`]. Document queries return a forward-only [`DocumentCursor`]
//! which the engine consumes through [`BatchStream`], a pull-based lazy
//! sequence of batches.

use crate::catalog::{IndexSpec, RemoteCollectionDescriptor};
use crate::namespace::Namespace;
use clonedb_codec::{RawDocument, Value};
use std::fmt;
use thiserror::Error;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors reported by the remote source.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The endpoint could not be reached.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A catalog or query command failed.
    #[error("command {command} failed: {message}")]
    Command {
        /// Command name.
        command: String,
        /// Failure description.
        message: String,
    },

    /// The cursor failed mid-iteration.
    #[error("cursor failed: {0}")]
    Cursor(String),
}

impl RemoteError {
    /// Creates a command failure.
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// A host and port pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAndPort {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl HostAndPort {
    /// Creates a host and port pair.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A remote deployment: one or more hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    hosts: Vec<HostAndPort>,
}

impl Endpoint {
    /// Creates an endpoint from its hosts.
    #[must_use]
    pub fn new(hosts: Vec<HostAndPort>) -> Self {
        Self { hosts }
    }

    /// Creates a single-host endpoint.
    pub fn single(host: impl Into<String>, port: u16) -> Self {
        Self::new(vec![HostAndPort::new(host, port)])
    }

    /// Returns the hosts.
    #[must_use]
    pub fn hosts(&self) -> &[HostAndPort] {
        &self.hosts
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, host) in self.hosts.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{host}")?;
        }
        Ok(())
    }
}

/// Credential used to authenticate as an internal cluster member.
#[derive(Clone, PartialEq, Eq)]
pub struct InternalCredential {
    /// Principal name.
    pub user: String,
    /// Shared secret.
    pub secret: String,
}

impl InternalCredential {
    /// Creates a credential.
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for InternalCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalCredential")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Which catalog entries a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionFilter {
    /// Regular collections only, no views.
    CollectionsOnly,
    /// Every entry.
    All,
}

/// Parameters of a document query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Equality predicates on top-level fields; empty matches everything.
    pub filter: Vec<(String, Value)>,
    /// Requested batch size; 0 lets the source choose.
    pub batch_size: u32,
    /// Keep the server-side cursor alive regardless of idle time.
    pub no_cursor_timeout: bool,
    /// Stream every batch without waiting for further requests.
    pub exhaust: bool,
}

impl QueryRequest {
    /// A query for every document, with no cursor timeout and exhaustive
    /// delivery.
    #[must_use]
    pub fn all_documents(batch_size: u32) -> Self {
        Self {
            filter: Vec::new(),
            batch_size,
            no_cursor_timeout: true,
            exhaust: true,
        }
    }

    /// Replaces the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Vec<(String, Value)>) -> Self {
        self.filter = filter;
        self
    }
}

/// A forward-only remote cursor.
pub trait DocumentCursor {
    /// Fetches the next batch; `None` once the cursor is exhausted.
    fn next_batch(&mut self) -> RemoteResult<Option<Vec<RawDocument>>>;
}

/// An authenticated-or-not session with a remote source.
pub trait RemoteSource {
    /// Address of the server this session talks to.
    fn server_address(&self) -> String;

    /// Authenticates as an internal cluster member.
    fn authenticate_internal(&mut self, credential: &InternalCredential) -> RemoteResult<()>;

    /// Lists the collections of `db`.
    fn list_collections(
        &mut self,
        db: &str,
        filter: CollectionFilter,
    ) -> RemoteResult<Vec<RemoteCollectionDescriptor>>;

    /// Lists the index specifications of `nss`.
    fn list_indexes(&mut self, nss: &Namespace) -> RemoteResult<Vec<IndexSpec>>;

    /// Runs a query and returns its cursor.
    fn query(
        &mut self,
        nss: &Namespace,
        request: &QueryRequest,
    ) -> RemoteResult<Box<dyn DocumentCursor + '_>>;
}

/// Opens sessions with remote sources.
pub trait RemoteConnector: Send + Sync {
    /// Connects to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Unreachable`] if no host answers.
    fn connect(&self, endpoint: &Endpoint) -> RemoteResult<Box<dyn RemoteSource>>;
}

/// Pull-based sequence of document batches over a cursor.
///
/// The stream is finite and cannot be restarted: it ends after the cursor
/// reports exhaustion or after the first error.
pub struct BatchStream<'a> {
    cursor: Box<dyn DocumentCursor + 'a>,
    done: bool,
}

impl<'a> BatchStream<'a> {
    /// Wraps a cursor.
    #[must_use]
    pub fn new(cursor: Box<dyn DocumentCursor + 'a>) -> Self {
        Self {
            cursor,
            done: false,
        }
    }
}

impl Iterator for BatchStream<'_> {
    type Item = RemoteResult<Vec<RawDocument>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for BatchStream<'_> {}

//! # clonedb testkit
//!
//! Test utilities for clonedb.
//!
//! This crate provides:
//! - In-memory doubles for every collaborator of the cloner: storage
//!   engine, remote source, replication coordinator and operation log
//! - Document and cluster fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use clonedb_testkit::prelude::*;
//!
//! let cluster = TestCluster::new();
//! cluster.remote.add_collection("shop", RemoteCollection::new("orders"));
//! let mut cloned = ClonedNamespaces::new();
//! cluster
//!     .cloner(ClonerConfig::default())
//!     .copy_database("shop", &cluster.endpoint(), &[], &mut cloned)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod observer;
pub mod remote;
pub mod replication;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::observer::*;
    pub use crate::remote::*;
    pub use crate::replication::*;
    pub use crate::storage::*;
    pub use clonedb_core::{ClonedNamespaces, ClonerConfig};
}

pub use fixtures::*;
pub use generators::*;
pub use observer::*;
pub use remote::*;
pub use replication::*;
pub use storage::*;

/// Installs a test-friendly tracing subscriber, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

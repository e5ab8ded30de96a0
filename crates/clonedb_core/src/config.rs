//! Configuration for the cloner.

use crate::remote::{HostAndPort, InternalCredential};
use crate::replication::IndexBuildProtocol;
use clonedb_codec::ValidationRules;
use std::time::Duration;

/// Documents processed between lock yields.
pub const DEFAULT_YIELD_INTERVAL: usize = 128;

/// Minimum time between progress log lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(60);

/// What to do when an inserted document already exists locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateKeyPolicy {
    /// Count the document as already cloned and continue.
    #[default]
    Tolerate,
    /// Fail the clone with the duplicate key error.
    Reject,
}

/// Configuration for a [`Cloner`](crate::Cloner).
#[derive(Debug, Clone)]
pub struct ClonerConfig {
    /// Skip documents that fail validation instead of aborting.
    pub skip_corrupt_documents: bool,
    /// Documents processed between lock yields. Zero disables yielding.
    pub yield_interval: usize,
    /// Minimum time between progress log lines.
    pub progress_interval: Duration,
    /// Batch size requested from the remote cursor; 0 lets the source choose.
    pub batch_size: u32,
    /// Credential to authenticate with, if any.
    pub internal_credential: Option<InternalCredential>,
    /// Addresses of this node, used to refuse cloning from self.
    pub local_hosts: Vec<HostAndPort>,
    /// Protocol used to announce index builds when writes are replicated.
    pub index_build_protocol: IndexBuildProtocol,
    /// Handling of documents that already exist locally.
    pub duplicate_key_policy: DuplicateKeyPolicy,
    /// Structural validation ruleset applied to every copied document.
    pub validation: ValidationRules,
}

impl ClonerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            skip_corrupt_documents: false,
            yield_interval: DEFAULT_YIELD_INTERVAL,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            batch_size: 0,
            internal_credential: None,
            local_hosts: Vec::new(),
            index_build_protocol: IndexBuildProtocol::TwoPhase,
            duplicate_key_policy: DuplicateKeyPolicy::Tolerate,
            validation: ValidationRules::latest(),
        }
    }

    /// Enables or disables skipping of corrupt documents.
    #[must_use]
    pub fn with_skip_corrupt_documents(mut self, skip: bool) -> Self {
        self.skip_corrupt_documents = skip;
        self
    }

    /// Sets the number of documents between lock yields.
    #[must_use]
    pub fn with_yield_interval(mut self, interval: usize) -> Self {
        self.yield_interval = interval;
        self
    }

    /// Sets the progress reporting interval.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the remote cursor batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the internal credential.
    #[must_use]
    pub fn with_internal_credential(mut self, credential: InternalCredential) -> Self {
        self.internal_credential = Some(credential);
        self
    }

    /// Adds a local address.
    #[must_use]
    pub fn with_local_host(mut self, host: HostAndPort) -> Self {
        self.local_hosts.push(host);
        self
    }

    /// Sets the index build protocol.
    #[must_use]
    pub fn with_index_build_protocol(mut self, protocol: IndexBuildProtocol) -> Self {
        self.index_build_protocol = protocol;
        self
    }

    /// Sets the duplicate key policy.
    #[must_use]
    pub fn with_duplicate_key_policy(mut self, policy: DuplicateKeyPolicy) -> Self {
        self.duplicate_key_policy = policy;
        self
    }

    /// Sets the validation ruleset.
    #[must_use]
    pub fn with_validation(mut self, rules: ValidationRules) -> Self {
        self.validation = rules;
        self
    }

    /// Returns true if `host` is one of this node's addresses.
    #[must_use]
    pub fn is_local_host(&self, host: &HostAndPort) -> bool {
        self.local_hosts.contains(host)
    }
}

impl Default for ClonerConfig {
    fn default() -> Self {
        Self::new()
    }
}

//! Injectable fault points for exercising failure paths in tests.

use crate::error::{CloneError, CloneResult};

/// Places in the engine where an injected failure can be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPointSite {
    /// Fail collection creation after the first collection was created.
    CreateCollectionsAfterFirst,
    /// Fail the document copier right before inserting a document.
    CopyBeforeInsert,
}

/// Decides whether an injected failure fires at a site.
pub trait FailPoint: Send + Sync {
    /// Returns true if the engine should fail at `site`.
    fn should_fail(&self, site: FailPointSite) -> bool;
}

/// The production strategy: never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFailPoints;

impl FailPoint for NoFailPoints {
    fn should_fail(&self, _site: FailPointSite) -> bool {
        false
    }
}

pub(crate) fn check(fail_point: &dyn FailPoint, site: FailPointSite) -> CloneResult<()> {
    if fail_point.should_fail(site) {
        Err(CloneError::FailPoint { site })
    } else {
        Ok(())
    }
}

use async_trait::async_trait;
use std::sync::Arc;

use crate::device::LegDevice;

/// Upper bound on copy destinations per request; the mirror's leg count is
/// bounded by this fan-out.
pub const MAX_COPY_DESTS: usize = 8;

/// One contiguous sector range on a leg device.
#[derive(Clone)]
pub struct CopyRange {
    pub device: Arc<dyn LegDevice>,
    pub sector: u64,
    pub count: u64,
}

/// Joint result of a bulk copy: a read error against the source, and one
/// error bit per destination, in the order the destinations were given.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyOutcome {
    pub read_error: bool,
    pub write_errors: u64,
}

impl CopyOutcome {
    pub fn ok(&self) -> bool {
        !self.read_error && self.write_errors == 0
    }
}

/// Bulk copy engine used by recovery: replicate a sector range from one
/// source range to up to [`MAX_COPY_DESTS`] destination ranges.
///
/// With `ignore_errors` set the engine still attempts every destination
/// but reports a clean outcome, giving best-effort resync semantics.
#[async_trait]
pub trait CopyEngine: Send + Sync {
    async fn copy(&self, from: CopyRange, to: Vec<CopyRange>, ignore_errors: bool) -> CopyOutcome;
}

use futures_channel::oneshot;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::device::SECTOR_SIZE;

/// Direction/kind of a submitted request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    Read,
    Write,
    Flush,
    Discard,
}

/// Outcome delivered exactly once per submitted request.
#[derive(Debug)]
pub enum IoOutcome {
    /// The request completed; reads carry the data that was returned.
    Done(Option<Vec<u8>>),
    /// Terminal failure, no further retries are possible.
    Failed,
    /// Transient suspend-time rejection, the caller should resubmit.
    Requeue,
    /// The mirror set was torn down before the request was dispatched.
    ShuttingDown,
}

impl IoOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, IoOutcome::Done(_))
    }
}

/// One pending logical request.
///
/// A request lives in exactly one queue (or one in-flight task) at a time.
/// The original sector/count are retained so a failed read can be replayed
/// against an alternate leg.
pub struct PendingIo {
    pub(crate) kind: IoKind,
    pub(crate) sector: u64,
    pub(crate) count: u64,
    pub(crate) payload: Option<Arc<Vec<u8>>>,
    pub(crate) completion: Option<oneshot::Sender<IoOutcome>>,
    /// Set while this write holds a pending-count reference on its region.
    pub(crate) pending_marked: bool,
}

impl PendingIo {
    /// Build a pending request. Public so region tracker implementations
    /// can construct requests in their own tests; the core builds these in
    /// its submission path.
    pub fn new(
        kind: IoKind,
        sector: u64,
        count: u64,
        payload: Option<Arc<Vec<u8>>>,
        completion: oneshot::Sender<IoOutcome>,
    ) -> Self {
        Self {
            kind,
            sector,
            count,
            payload,
            completion: Some(completion),
            pending_marked: false,
        }
    }

    pub fn kind(&self) -> IoKind {
        self.kind
    }

    pub fn sector(&self) -> u64 {
        self.sector
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.count as usize * SECTOR_SIZE
    }

    /// Deliver the final outcome. The receiver may already be gone; a
    /// dropped receiver just means nobody is waiting.
    pub(crate) fn complete(mut self, outcome: IoOutcome) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// The mirror set's pending queues. Protected by a single mutex; the
/// dispatch loop snapshots the first three with [`IoQueues::take_batch`]
/// and processes them without the lock held. The holds queue is only
/// drained by resume and shutdown.
#[derive(Default)]
pub(crate) struct IoQueues {
    pub reads: VecDeque<PendingIo>,
    pub writes: VecDeque<PendingIo>,
    pub failures: VecDeque<PendingIo>,
    pub holds: VecDeque<PendingIo>,
}

pub(crate) struct IoBatch {
    pub reads: VecDeque<PendingIo>,
    pub writes: VecDeque<PendingIo>,
    pub failures: VecDeque<PendingIo>,
}

impl IoQueues {
    pub fn take_batch(&mut self) -> IoBatch {
        IoBatch {
            reads: std::mem::take(&mut self.reads),
            writes: std::mem::take(&mut self.writes),
            failures: std::mem::take(&mut self.failures),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty() && self.failures.is_empty()
    }
}

impl IoBatch {
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty() && self.failures.is_empty()
    }
}

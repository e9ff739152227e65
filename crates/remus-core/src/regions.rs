use async_trait::async_trait;

use crate::error::MirrorResult;
use crate::io::PendingIo;
use crate::mirror::StatusKind;

/// Synchronization state of one fixed-size region of the logical address
/// space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionState {
    /// In sync, no writes outstanding.
    Clean,
    /// In sync, with writes in flight.
    Dirty,
    /// Not synchronized across legs.
    NoSync,
    /// A recovery copy for this region is in flight.
    Recovering,
}

impl RegionState {
    pub fn in_sync(self) -> bool {
        matches!(self, RegionState::Clean | RegionState::Dirty)
    }
}

/// Dirty-log seam: tracks per-region synchronization state and hands out
/// recovery work. The mirror core only ever talks through this trait and
/// never inspects the concrete log.
///
/// Implementations must be internally synchronized; the core calls these
/// methods from the dispatch task and from I/O completion tasks.
#[async_trait]
pub trait RegionTracker: Send + Sync {
    /// Region size in sectors. Must be a power of two.
    fn region_size(&self) -> u64;

    fn nr_regions(&self) -> u64;

    /// Region containing the given logical sector.
    fn region_of(&self, sector: u64) -> u64 {
        sector / self.region_size()
    }

    fn state(&self, region: u64) -> RegionState;

    /// Drop a region out of sync after a write to it failed.
    fn mark_nosync(&self, region: u64);

    /// Take a pending-write reference on a region, marking it dirty.
    /// Must be called before the write is dispatched to any leg.
    fn inc_pending(&self, region: u64);

    /// Release a pending-write reference. A dirty region with no remaining
    /// pending writes reverts to clean.
    fn dec_pending(&self, region: u64);

    fn pending(&self, region: u64) -> u32;

    /// Park a write that targets a recovering region. Returns the request
    /// back when the region is no longer recovering, in which case the
    /// caller requeues it itself.
    fn delay(&self, region: u64, io: PendingIo) -> Option<PendingIo>;

    /// Fold completed recoveries into region state, honoring whether the
    /// mirror handles errors, and release any writes that were delayed on
    /// those regions. Called once at the top of every dispatch activation.
    fn update_states(&self, errors_handled: bool) -> Vec<PendingIo>;

    /// Remove and return every delayed write, regardless of region state.
    /// Called during teardown so requests parked behind an unfinished
    /// recovery still get a completion.
    fn drain_delayed(&self) -> Vec<PendingIo>;

    /// Hand out the next region needing recovery, transitioning it to
    /// [`RegionState::Recovering`]. Returns `None` when recovery is
    /// stopped, the concurrency cap is reached, or no work remains in the
    /// current pass.
    fn recovery_start(&self) -> Option<u64>;

    /// Report that the recovery copy for `region` finished.
    fn recovery_end(&self, region: u64, success: bool);

    /// (Re)enable recovery and rewind to the start of the address space.
    fn start_recovery(&self);

    fn stop_recovery(&self);

    /// Whether another node is recovering this region. Always `false` for
    /// single-node logs.
    fn is_remote_recovering(&self, region: u64) -> bool;

    /// Number of regions currently in sync.
    fn sync_count(&self) -> u64;

    /// Make dirty-region marks durable. Failure poisons the mirror's log
    /// health latch.
    async fn flush(&self) -> MirrorResult<()>;

    /// The log's own status fragment, appended to the mirror's.
    fn status(&self, kind: StatusKind) -> String;
}

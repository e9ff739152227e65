//! In-memory region log for the mirror core.
//!
//! Tracks per-region synchronization state, pending-write counters, and a
//! one-pass recovery cursor. Durability is out of scope: `flush` is a
//! no-op unless a flush fault has been injected, which makes this log
//! double as the failure-injection point for mirror tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use remus_core::io::PendingIo;
use remus_core::{MirrorError, MirrorErrorKind, MirrorResult, RegionState, RegionTracker, StatusKind};

/// Concurrent recoveries this log will hand out. Serialized to keep the
/// resync footprint small.
const MAX_INFLIGHT_RECOVERIES: usize = 1;

struct RegionSlot {
    state: RegionState,
    pending: u32,
    delayed: Vec<PendingIo>,
}

struct LogState {
    regions: Vec<RegionSlot>,
    /// Recoveries that completed but have not yet been folded into region
    /// state by `update_states`.
    recovered: Vec<(u64, bool)>,
    /// Next region the recovery pass will consider. Monotone within a
    /// pass; `start_recovery` rewinds it.
    cursor: u64,
    in_flight: usize,
    recovery_enabled: bool,
    sync_count: u64,
}

/// In-memory [`RegionTracker`].
pub struct MemoryRegionLog {
    region_size: u64,
    nr_regions: u64,
    created_in_sync: bool,
    fail_flushes: AtomicBool,
    flush_failed: AtomicBool,
    state: Mutex<LogState>,
}

impl MemoryRegionLog {
    /// Build a log over `nr_regions` regions of `region_size` sectors.
    /// With `create_in_sync` set every region starts clean, mirroring the
    /// dirty-log convention of trusting pre-initialized legs.
    pub fn new(region_size: u64, nr_regions: u64, create_in_sync: bool) -> MirrorResult<Self> {
        if region_size == 0 || !region_size.is_power_of_two() {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                "region size must be a non-zero power of two",
            ));
        }
        if nr_regions == 0 {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                "region log needs at least one region",
            ));
        }
        let initial = if create_in_sync {
            RegionState::Clean
        } else {
            RegionState::NoSync
        };
        let regions = (0..nr_regions)
            .map(|_| RegionSlot {
                state: initial,
                pending: 0,
                delayed: Vec::new(),
            })
            .collect();
        Ok(Self {
            region_size,
            nr_regions,
            created_in_sync: create_in_sync,
            fail_flushes: AtomicBool::new(false),
            flush_failed: AtomicBool::new(false),
            state: Mutex::new(LogState {
                regions,
                recovered: Vec::new(),
                cursor: 0,
                in_flight: 0,
                recovery_enabled: true,
                sync_count: if create_in_sync { nr_regions } else { 0 },
            }),
        })
    }

    /// Convenience constructor sizing the log for a target of
    /// `target_len` sectors.
    pub fn for_target(
        region_size: u64,
        target_len: u64,
        create_in_sync: bool,
    ) -> MirrorResult<Self> {
        if target_len == 0 {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                "target length must be non-zero",
            ));
        }
        if region_size == 0 {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                "region size must be non-zero",
            ));
        }
        Self::new(region_size, target_len.div_ceil(region_size), create_in_sync)
    }

    /// Make every subsequent flush fail (or succeed again). Test hook for
    /// exercising the mirror's log-failure path.
    pub fn fail_flushes(&self, fail: bool) {
        self.fail_flushes.store(fail, Ordering::Release);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl RegionTracker for MemoryRegionLog {
    fn region_size(&self) -> u64 {
        self.region_size
    }

    fn nr_regions(&self) -> u64 {
        self.nr_regions
    }

    fn state(&self, region: u64) -> RegionState {
        self.lock().regions[region as usize].state
    }

    fn mark_nosync(&self, region: u64) {
        let mut state = self.lock();
        let slot = &mut state.regions[region as usize];
        if slot.state.in_sync() {
            slot.state = RegionState::NoSync;
            state.sync_count -= 1;
            debug!(region, "region dropped out of sync");
        }
    }

    fn inc_pending(&self, region: u64) {
        let mut state = self.lock();
        let slot = &mut state.regions[region as usize];
        slot.pending += 1;
        if slot.state == RegionState::Clean {
            slot.state = RegionState::Dirty;
        }
    }

    fn dec_pending(&self, region: u64) {
        let mut state = self.lock();
        let slot = &mut state.regions[region as usize];
        slot.pending = slot.pending.saturating_sub(1);
        if slot.pending == 0 && slot.state == RegionState::Dirty {
            slot.state = RegionState::Clean;
        }
    }

    fn pending(&self, region: u64) -> u32 {
        self.lock().regions[region as usize].pending
    }

    fn delay(&self, region: u64, io: PendingIo) -> Option<PendingIo> {
        let mut state = self.lock();
        let slot = &mut state.regions[region as usize];
        if slot.state == RegionState::Recovering {
            slot.delayed.push(io);
            None
        } else {
            Some(io)
        }
    }

    fn update_states(&self, errors_handled: bool) -> Vec<PendingIo> {
        let mut state = self.lock();
        let completed = std::mem::take(&mut state.recovered);
        let mut released = Vec::new();
        for (region, success) in completed {
            let slot = &mut state.regions[region as usize];
            released.append(&mut slot.delayed);
            if success || !errors_handled {
                slot.state = RegionState::Clean;
                state.sync_count += 1;
                debug!(region, "region recovered");
            } else {
                slot.state = RegionState::NoSync;
                debug!(region, "region recovery failed, staying out of sync");
            }
        }
        released
    }

    fn drain_delayed(&self) -> Vec<PendingIo> {
        let mut state = self.lock();
        let mut drained = Vec::new();
        for slot in &mut state.regions {
            drained.append(&mut slot.delayed);
        }
        drained
    }

    fn recovery_start(&self) -> Option<u64> {
        let mut state = self.lock();
        if !state.recovery_enabled || state.in_flight >= MAX_INFLIGHT_RECOVERIES {
            return None;
        }
        while state.cursor < self.nr_regions {
            let region = state.cursor;
            let (slot_state, slot_pending) = {
                let slot = &state.regions[region as usize];
                (slot.state, slot.pending)
            };
            match slot_state {
                RegionState::NoSync if slot_pending == 0 => {
                    state.regions[region as usize].state = RegionState::Recovering;
                    state.cursor += 1;
                    state.in_flight += 1;
                    return Some(region);
                }
                // Writes are still draining; hold position until the
                // region quiesces.
                RegionState::NoSync => return None,
                _ => state.cursor += 1,
            }
        }
        None
    }

    fn recovery_end(&self, region: u64, success: bool) {
        let mut state = self.lock();
        debug_assert_eq!(state.regions[region as usize].state, RegionState::Recovering);
        state.in_flight -= 1;
        state.recovered.push((region, success));
    }

    fn start_recovery(&self) {
        let mut state = self.lock();
        state.recovery_enabled = true;
        state.cursor = 0;
    }

    fn stop_recovery(&self) {
        self.lock().recovery_enabled = false;
    }

    fn is_remote_recovering(&self, _region: u64) -> bool {
        false
    }

    fn sync_count(&self) -> u64 {
        self.lock().sync_count
    }

    async fn flush(&self) -> MirrorResult<()> {
        if self.fail_flushes.load(Ordering::Acquire) {
            self.flush_failed.store(true, Ordering::Release);
            return Err(MirrorError::with_message(
                MirrorErrorKind::LogFailure,
                "injected region log flush failure",
            ));
        }
        Ok(())
    }

    fn status(&self, kind: StatusKind) -> String {
        match kind {
            StatusKind::Info => {
                let health = if self.flush_failed.load(Ordering::Acquire) {
                    'F'
                } else {
                    'A'
                };
                format!("memory 2 {} {health}", self.region_size)
            }
            StatusKind::Table => {
                if self.created_in_sync {
                    format!("memory 2 {} sync", self.region_size)
                } else {
                    format!("memory 1 {}", self.region_size)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures_channel::oneshot;
    use remus_core::IoKind;

    fn log(regions: u64) -> MemoryRegionLog {
        MemoryRegionLog::new(1024, regions, false).expect("log")
    }

    fn write_io(sector: u64) -> PendingIo {
        let (tx, _rx) = oneshot::channel();
        PendingIo::new(IoKind::Write, sector, 1, None, tx)
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(MemoryRegionLog::new(0, 4, false).is_err());
        assert!(MemoryRegionLog::new(1000, 4, false).is_err());
        assert!(MemoryRegionLog::new(1024, 0, false).is_err());
    }

    #[test]
    fn for_target_rounds_up() {
        let log = MemoryRegionLog::for_target(1024, 2500, false).expect("log");
        assert_eq!(log.nr_regions(), 3);
    }

    #[test]
    fn pending_counter_drives_clean_dirty() {
        let log = MemoryRegionLog::new(1024, 2, true).expect("log");
        assert_eq!(log.state(0), RegionState::Clean);
        log.inc_pending(0);
        assert_eq!(log.state(0), RegionState::Dirty);
        log.inc_pending(0);
        log.dec_pending(0);
        assert_eq!(log.state(0), RegionState::Dirty);
        log.dec_pending(0);
        assert_eq!(log.state(0), RegionState::Clean);
        assert_eq!(log.sync_count(), 2);
    }

    #[test]
    fn mark_nosync_drops_sync_count() {
        let log = MemoryRegionLog::new(1024, 2, true).expect("log");
        log.mark_nosync(1);
        assert_eq!(log.state(1), RegionState::NoSync);
        assert_eq!(log.sync_count(), 1);
        // Repeated marks are idempotent.
        log.mark_nosync(1);
        assert_eq!(log.sync_count(), 1);
    }

    #[test]
    fn recovery_is_serialized_and_one_pass() {
        let log = log(3);
        let first = log.recovery_start().expect("first region");
        assert_eq!(first, 0);
        assert_eq!(log.state(0), RegionState::Recovering);
        // Cap of one in flight.
        assert_eq!(log.recovery_start(), None);

        log.recovery_end(0, true);
        assert_eq!(log.update_states(true).len(), 0);
        assert_eq!(log.state(0), RegionState::Clean);
        assert_eq!(log.sync_count(), 1);

        assert_eq!(log.recovery_start(), Some(1));
        log.recovery_end(1, false);
        log.update_states(true);
        // Failed region stays out of sync and is not retried this pass.
        assert_eq!(log.state(1), RegionState::NoSync);
        assert_eq!(log.recovery_start(), Some(2));
        log.recovery_end(2, true);
        log.update_states(true);
        assert_eq!(log.recovery_start(), None);

        // Rewinding the pass picks the failed region up again.
        log.start_recovery();
        assert_eq!(log.recovery_start(), Some(1));
    }

    #[test]
    fn failed_recovery_counts_as_sync_without_error_handling() {
        let log = log(1);
        assert_eq!(log.recovery_start(), Some(0));
        log.recovery_end(0, false);
        log.update_states(false);
        assert_eq!(log.state(0), RegionState::Clean);
        assert_eq!(log.sync_count(), 1);
    }

    #[test]
    fn recovery_waits_for_pending_writes() {
        let log = log(2);
        log.inc_pending(0);
        assert_eq!(log.recovery_start(), None);
        log.dec_pending(0);
        assert_eq!(log.recovery_start(), Some(0));
    }

    #[test]
    fn delayed_writes_release_on_update() {
        let log = log(1);
        assert_eq!(log.recovery_start(), Some(0));
        assert!(log.delay(0, write_io(0)).is_none());
        assert!(log.delay(0, write_io(8)).is_none());
        log.recovery_end(0, true);
        let released = log.update_states(true);
        assert_eq!(released.len(), 2);
        // A region that is not recovering hands the request straight back.
        assert!(log.delay(0, write_io(0)).is_some());
    }

    #[test]
    fn drain_delayed_empties_every_region() {
        let log = log(2);
        assert_eq!(log.recovery_start(), Some(0));
        assert!(log.delay(0, write_io(0)).is_none());
        assert!(log.delay(0, write_io(8)).is_none());
        let drained = log.drain_delayed();
        assert_eq!(drained.len(), 2);
        // Nothing left behind for update_states to release later.
        log.recovery_end(0, true);
        assert_eq!(log.update_states(true).len(), 0);
        assert_eq!(log.drain_delayed().len(), 0);
    }

    #[test]
    fn stop_recovery_blocks_handout() {
        let log = log(1);
        log.stop_recovery();
        assert_eq!(log.recovery_start(), None);
        log.start_recovery();
        assert_eq!(log.recovery_start(), Some(0));
    }

    #[test]
    fn flush_fault_injection() {
        let log = log(1);
        assert!(block_on(log.flush()).is_ok());
        log.fail_flushes(true);
        let err = block_on(log.flush()).expect_err("flush must fail");
        assert_eq!(err.kind(), MirrorErrorKind::LogFailure);
        assert!(log.status(StatusKind::Info).ends_with('F'));
        log.fail_flushes(false);
        assert!(block_on(log.flush()).is_ok());
    }

    #[test]
    fn status_reflects_creation_args() {
        let log = MemoryRegionLog::new(1024, 4, true).expect("log");
        assert_eq!(log.status(StatusKind::Table), "memory 2 1024 sync");
        let log = MemoryRegionLog::new(512, 4, false).expect("log");
        assert_eq!(log.status(StatusKind::Table), "memory 1 512");
        assert_eq!(log.status(StatusKind::Info), "memory 2 512 A");
    }
}

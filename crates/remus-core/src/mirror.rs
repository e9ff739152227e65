use futures_channel::{mpsc, oneshot};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Arc, Mutex, Weak,
};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::copier::{CopyEngine, MAX_COPY_DESTS};
use crate::device::LegDevice;
use crate::error::{MirrorError, MirrorErrorKind, MirrorResult};
use crate::io::{IoKind, IoOutcome, IoQueues, PendingIo};
use crate::leg::{Fault, Leg};
use crate::regions::RegionTracker;

/// Maximum number of legs, bounded by the copy engine's fan-out.
pub const MAX_LEGS: usize = MAX_COPY_DESTS;

/// Concurrent region recoveries. Strictly serialized to bound resource use.
pub(crate) const MAX_RECOVERY: usize = 1;

/// Delay applied to wakeups that merge into a non-empty queue, so a busy
/// mirror batches work instead of thrashing the worker.
const DELAYED_WAKE: Duration = Duration::from_millis(200);

/// Which status string to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Table,
}

/// One leg of the mirror as given to [`MirrorSet::create`]: an opened
/// backing device plus the sector offset the target maps through.
pub struct LegSpec {
    pub device: Arc<dyn LegDevice>,
    pub offset: u64,
}

/// Administrative notifications raised by the mirror. The channel is the
/// userspace analogue of a "configuration changed" event to management
/// tooling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorEvent {
    FullySynced,
    LegDegraded { leg: usize, fault: Fault },
    PrimaryChanged { from: usize, to: usize },
    AllLegsFailed,
    LogFailed,
}

/// Construction options.
pub struct MirrorOptions {
    /// When set, leg failures re-elect the primary and surface I/O errors
    /// to callers once no healthy alternative remains. When clear the
    /// mirror degrades silently and best-effort.
    pub handle_errors: bool,
    /// Optional sink for [`MirrorEvent`]s.
    pub events: Option<mpsc::UnboundedSender<MirrorEvent>>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            handle_errors: false,
            events: None,
        }
    }
}

/// A mirrored block target: N legs kept consistent through a region log,
/// with asynchronous write fan-out, read failover, and background
/// resynchronization.
///
/// All I/O is queued and drained by a single worker activation at a time;
/// see [`MirrorSet::worker`].
pub struct MirrorSet {
    me: Weak<MirrorSet>,
    legs: Vec<Leg>,
    tracker: Arc<dyn RegionTracker>,
    copier: Arc<dyn CopyEngine>,
    target_len: u64,
    handle_errors: bool,
    events: Option<mpsc::UnboundedSender<MirrorEvent>>,

    pub(crate) queues: Mutex<IoQueues>,
    pub(crate) wake_signal: Notify,
    quiesce: Notify,

    in_sync: AtomicBool,
    log_failure: AtomicBool,
    leg_failure: AtomicBool,
    suspends: AtomicU32,
    noflush_suspend: AtomicBool,
    shutting_down: AtomicBool,
    primary: AtomicUsize,
    pub(crate) recoveries: AtomicUsize,
    inflight: AtomicUsize,
    delayed_wake_armed: AtomicBool,
}

impl std::fmt::Debug for MirrorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSet")
            .field("legs", &self.legs.len())
            .field("target_len", &self.target_len)
            .finish_non_exhaustive()
    }
}

impl MirrorSet {
    /// Build a mirror set over already opened leg devices.
    ///
    /// Validates the leg count against [`MAX_LEGS`], that every leg's
    /// device can address `offset + target_len` sectors, and that the
    /// tracker's geometry matches `target_len`.
    pub fn create(
        legs: Vec<LegSpec>,
        target_len: u64,
        tracker: Arc<dyn RegionTracker>,
        copier: Arc<dyn CopyEngine>,
        options: MirrorOptions,
    ) -> MirrorResult<Arc<Self>> {
        if legs.len() < 2 || legs.len() > MAX_LEGS {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                format!("leg count must be 2..={MAX_LEGS}, got {}", legs.len()),
            ));
        }
        if target_len == 0 {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                "target length must be non-zero",
            ));
        }
        let region_size = tracker.region_size();
        if region_size == 0 || !region_size.is_power_of_two() {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                "region size must be a non-zero power of two",
            ));
        }
        let nr_regions = target_len.div_ceil(region_size);
        if tracker.nr_regions() != nr_regions {
            return Err(MirrorError::with_message(
                MirrorErrorKind::InvalidArgument,
                format!(
                    "region log covers {} regions, target needs {nr_regions}",
                    tracker.nr_regions()
                ),
            ));
        }
        for spec in &legs {
            let end = spec.offset.checked_add(target_len);
            match end {
                Some(end) if end <= spec.device.total_sectors() => {}
                _ => {
                    return Err(MirrorError::with_message(
                        MirrorErrorKind::DeviceLookup,
                        format!(
                            "leg {} too small: offset {} + len {target_len} exceeds {} sectors",
                            spec.device.name(),
                            spec.offset,
                            spec.device.total_sectors()
                        ),
                    ));
                }
            }
        }

        let in_sync = tracker.sync_count() == nr_regions;
        let legs = legs
            .into_iter()
            .map(|spec| Leg::new(spec.device, spec.offset))
            .collect::<Vec<_>>();
        debug!(
            legs = legs.len(),
            target_len,
            region_size,
            nr_regions,
            handle_errors = options.handle_errors,
            "created mirror set"
        );

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            legs,
            tracker,
            copier,
            target_len,
            handle_errors: options.handle_errors,
            events: options.events,
            queues: Mutex::new(IoQueues::default()),
            wake_signal: Notify::new(),
            quiesce: Notify::new(),
            in_sync: AtomicBool::new(in_sync),
            log_failure: AtomicBool::new(false),
            leg_failure: AtomicBool::new(false),
            suspends: AtomicU32::new(0),
            noflush_suspend: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            primary: AtomicUsize::new(0),
            recoveries: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            delayed_wake_armed: AtomicBool::new(false),
        }))
    }

    /// Strong handle to this mirror set, used by completion tasks.
    pub(crate) fn strong(&self) -> Option<Arc<MirrorSet>> {
        self.me.upgrade()
    }

    pub fn target_len(&self) -> u64 {
        self.target_len
    }

    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    pub fn leg(&self, idx: usize) -> &Leg {
        &self.legs[idx]
    }

    pub(crate) fn legs(&self) -> &[Leg] {
        &self.legs
    }

    pub fn primary(&self) -> usize {
        self.primary.load(Ordering::Acquire)
    }

    pub(crate) fn set_primary(&self, idx: usize) {
        self.primary.store(idx, Ordering::Release);
    }

    pub fn in_sync(&self) -> bool {
        self.in_sync.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_sync(&self, value: bool) {
        self.in_sync.store(value, Ordering::Release);
    }

    pub fn log_failed(&self) -> bool {
        self.log_failure.load(Ordering::Acquire)
    }

    pub(crate) fn record_log_failure(&self) {
        if !self.log_failure.swap(true, Ordering::AcqRel) {
            warn!("region log flush failed; log marked unusable");
            self.emit(MirrorEvent::LogFailed);
        }
    }

    pub fn any_leg_failed(&self) -> bool {
        self.leg_failure.load(Ordering::Acquire)
    }

    pub(crate) fn record_leg_failure(&self) {
        self.leg_failure.store(true, Ordering::Release);
    }

    pub fn handle_errors(&self) -> bool {
        self.handle_errors
    }

    pub(crate) fn tracker(&self) -> &Arc<dyn RegionTracker> {
        &self.tracker
    }

    pub(crate) fn copier(&self) -> &Arc<dyn CopyEngine> {
        &self.copier
    }

    pub fn is_suspended(&self) -> bool {
        self.suspends.load(Ordering::Acquire) > 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn emit(&self, event: MirrorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.unbounded_send(event);
        }
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Queue a read of `count` sectors starting at `sector`.
    pub fn read(&self, sector: u64, count: u64) -> oneshot::Receiver<IoOutcome> {
        self.submit(IoKind::Read, sector, count, None)
    }

    /// Queue a write; the payload length must be a multiple of the sector
    /// size and determines the sector count.
    pub fn write(&self, sector: u64, payload: Vec<u8>) -> oneshot::Receiver<IoOutcome> {
        let count = (payload.len() / crate::device::SECTOR_SIZE) as u64;
        if payload.is_empty() || payload.len() % crate::device::SECTOR_SIZE != 0 {
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(IoOutcome::Failed);
            warn!(sector, len = payload.len(), "rejecting misaligned write");
            return rx;
        }
        self.submit(IoKind::Write, sector, count, Some(Arc::new(payload)))
    }

    /// Queue a flush, replicated to every leg.
    pub fn flush(&self) -> oneshot::Receiver<IoOutcome> {
        self.submit(IoKind::Flush, 0, 0, None)
    }

    /// Queue a discard hint for the given range.
    pub fn discard(&self, sector: u64, count: u64) -> oneshot::Receiver<IoOutcome> {
        self.submit(IoKind::Discard, sector, count, None)
    }

    fn submit(
        &self,
        kind: IoKind,
        sector: u64,
        count: u64,
        payload: Option<Arc<Vec<u8>>>,
    ) -> oneshot::Receiver<IoOutcome> {
        let (tx, rx) = oneshot::channel();
        let io = PendingIo::new(kind, sector, count, payload, tx);

        if self.is_shutting_down() {
            io.complete(IoOutcome::ShuttingDown);
            return rx;
        }
        if kind != IoKind::Flush {
            let in_range = sector
                .checked_add(count)
                .map(|end| end <= self.target_len)
                .unwrap_or(false);
            if !in_range {
                warn!(sector, count, "rejecting out-of-range request");
                io.complete(IoOutcome::Failed);
                return rx;
            }
        }
        if self.is_suspended() {
            self.hold_io(io);
            return rx;
        }

        match kind {
            IoKind::Read => self.queue_read(io),
            _ => self.queue_write(io),
        }
        rx
    }

    pub(crate) fn queue_read(&self, io: PendingIo) {
        let was_empty = {
            let mut queues = self.lock_queues();
            let was_empty = queues.reads.is_empty();
            queues.reads.push_back(io);
            was_empty
        };
        self.wake_after_enqueue(was_empty);
    }

    pub(crate) fn queue_write(&self, io: PendingIo) {
        let was_empty = {
            let mut queues = self.lock_queues();
            let was_empty = queues.writes.is_empty();
            queues.writes.push_back(io);
            was_empty
        };
        self.wake_after_enqueue(was_empty);
    }

    pub(crate) fn queue_failure(&self, io: PendingIo) {
        {
            let mut queues = self.lock_queues();
            queues.failures.push_back(io);
        }
        self.wake();
    }

    pub(crate) fn lock_queues(&self) -> std::sync::MutexGuard<'_, IoQueues> {
        match self.queues.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ------------------------------------------------------------------
    // Wakeups
    // ------------------------------------------------------------------

    /// Schedule a worker activation. Submissions wake the worker on their
    /// own; call this after creating a worker for an out-of-sync mirror so
    /// background resynchronization starts without waiting for I/O.
    pub fn wake(&self) {
        self.wake_signal.notify_one();
    }

    /// Merging into a non-empty queue defers the wakeup so in-flight drains
    /// batch naturally; an empty queue wakes the worker immediately.
    fn wake_after_enqueue(&self, was_empty: bool) {
        if was_empty {
            self.wake();
        } else {
            self.delayed_wake();
        }
    }

    pub(crate) fn delayed_wake(&self) {
        if self.delayed_wake_armed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(ms) = self.strong() else { return };
        tokio::spawn(async move {
            tokio::time::sleep(DELAYED_WAKE).await;
            ms.delayed_wake_armed.store(false, Ordering::Release);
            ms.wake();
        });
    }

    // ------------------------------------------------------------------
    // In-flight accounting (used by suspend to quiesce)
    // ------------------------------------------------------------------

    pub(crate) fn io_started(&self) {
        self.inflight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn io_finished(&self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        self.quiesce.notify_waiters();
    }

    pub(crate) fn notify_quiesce(&self) {
        self.quiesce.notify_waiters();
    }

    fn quiesced(&self) -> bool {
        self.inflight.load(Ordering::Acquire) == 0
            && self.recoveries.load(Ordering::Acquire) == 0
            && self.lock_queues().is_empty()
    }

    // ------------------------------------------------------------------
    // Final completion
    // ------------------------------------------------------------------

    /// Complete a request, dropping its pending-count reference first.
    /// Completed writes wake the worker so quiesced regions can enter
    /// recovery.
    pub(crate) fn end_io(&self, mut io: PendingIo, outcome: IoOutcome) {
        let wake_for_recovery = if io.pending_marked {
            io.pending_marked = false;
            self.tracker.dec_pending(self.tracker.region_of(io.sector));
            !self.in_sync()
        } else {
            false
        };
        io.complete(outcome);
        if wake_for_recovery {
            self.wake();
        }
        self.notify_quiesce();
    }

    /// Park a request blocked by a failure until resume, or bounce it
    /// immediately when a suspend is already active.
    pub(crate) fn hold_io(&self, mut io: PendingIo) {
        if self.is_suspended() {
            let outcome = if self.noflush_suspend.load(Ordering::Acquire) {
                IoOutcome::Requeue
            } else {
                IoOutcome::Failed
            };
            self.end_io(io, outcome);
            return;
        }
        if io.pending_marked {
            io.pending_marked = false;
            self.tracker.dec_pending(self.tracker.region_of(io.sector));
        }
        self.lock_queues().holds.push_back(io);
    }

    // ------------------------------------------------------------------
    // Suspend / resume / shutdown
    // ------------------------------------------------------------------

    /// Stop recovery, divert new I/O, and wait for everything in flight to
    /// drain. With `noflush` set, diverted I/O completes with
    /// [`IoOutcome::Requeue`] instead of an error.
    pub async fn suspend(&self, noflush: bool) {
        self.noflush_suspend.store(noflush, Ordering::Release);
        self.suspends.fetch_add(1, Ordering::AcqRel);
        self.tracker.stop_recovery();
        self.wake();
        loop {
            let waiter = self.quiesce.notified();
            if self.quiesced() {
                break;
            }
            waiter.await;
        }
        if let Err(err) = self.tracker.flush().await {
            warn!(%err, "log flush on suspend failed");
            self.record_log_failure();
        }
        debug!(noflush, "mirror suspended");
    }

    /// Re-admit held I/O and restart recovery from the top of the address
    /// space.
    pub fn resume(&self) {
        let before = self.suspends.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(before > 0, "resume without matching suspend");
        self.tracker.start_recovery();
        let held = {
            let mut queues = self.lock_queues();
            std::mem::take(&mut queues.holds)
        };
        for io in held {
            match io.kind() {
                IoKind::Read => self.queue_read(io),
                _ => self.queue_write(io),
            }
        }
        self.wake();
        debug!("mirror resumed");
    }

    /// Begin teardown: the worker fails all queued-but-undispatched
    /// requests with [`IoOutcome::ShuttingDown`] and exits.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.tracker.stop_recovery();
        self.wake();
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Render the administrative status line. Health characters always
    /// reflect true per-leg state regardless of the error-handling mode.
    pub fn status(&self, kind: StatusKind) -> String {
        match kind {
            StatusKind::Info => {
                let mut out = format!("{}", self.legs.len());
                for leg in &self.legs {
                    out.push(' ');
                    out.push_str(leg.name());
                }
                let health: String = self.legs.iter().map(Leg::health_char).collect();
                out.push_str(&format!(
                    " {}/{} 1 {health} {}",
                    self.tracker.sync_count(),
                    self.tracker.nr_regions(),
                    self.tracker.status(StatusKind::Info),
                ));
                out
            }
            StatusKind::Table => {
                let mut out = self.tracker.status(StatusKind::Table);
                out.push_str(&format!(" {}", self.legs.len()));
                for leg in &self.legs {
                    out.push_str(&format!(" {} {}", leg.name(), leg.offset()));
                }
                if self.handle_errors {
                    out.push_str(" 1 handle_errors");
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copier::{CopyOutcome, CopyRange};
    use crate::device::DeviceResult;
    use crate::error::MirrorResult;
    use crate::regions::{RegionState, RegionTracker};
    use async_trait::async_trait;
    use futures::executor::block_on;

    struct FixedDevice {
        name: &'static str,
        sectors: u64,
    }

    #[async_trait]
    impl crate::device::LegDevice for FixedDevice {
        fn name(&self) -> &str {
            self.name
        }

        fn total_sectors(&self) -> u64 {
            self.sectors
        }

        async fn read_sectors(&self, _sector: u64, _buf: &mut [u8]) -> DeviceResult<()> {
            Ok(())
        }

        async fn write_sectors(&self, _sector: u64, _buf: &[u8]) -> DeviceResult<()> {
            Ok(())
        }

        async fn flush(&self) -> DeviceResult<()> {
            Ok(())
        }
    }

    struct StubTracker {
        region_size: u64,
        nr_regions: u64,
        synced: u64,
    }

    #[async_trait]
    impl RegionTracker for StubTracker {
        fn region_size(&self) -> u64 {
            self.region_size
        }

        fn nr_regions(&self) -> u64 {
            self.nr_regions
        }

        fn state(&self, _region: u64) -> RegionState {
            RegionState::Clean
        }

        fn mark_nosync(&self, _region: u64) {}

        fn inc_pending(&self, _region: u64) {}

        fn dec_pending(&self, _region: u64) {}

        fn pending(&self, _region: u64) -> u32 {
            0
        }

        fn delay(&self, _region: u64, io: PendingIo) -> Option<PendingIo> {
            Some(io)
        }

        fn update_states(&self, _errors_handled: bool) -> Vec<PendingIo> {
            Vec::new()
        }

        fn drain_delayed(&self) -> Vec<PendingIo> {
            Vec::new()
        }

        fn recovery_start(&self) -> Option<u64> {
            None
        }

        fn recovery_end(&self, _region: u64, _success: bool) {}

        fn start_recovery(&self) {}

        fn stop_recovery(&self) {}

        fn is_remote_recovering(&self, _region: u64) -> bool {
            false
        }

        fn sync_count(&self) -> u64 {
            self.synced
        }

        async fn flush(&self) -> MirrorResult<()> {
            Ok(())
        }

        fn status(&self, _kind: StatusKind) -> String {
            "stub".into()
        }
    }

    struct NullCopier;

    #[async_trait]
    impl CopyEngine for NullCopier {
        async fn copy(
            &self,
            _from: CopyRange,
            _to: Vec<CopyRange>,
            _ignore_errors: bool,
        ) -> CopyOutcome {
            CopyOutcome::default()
        }
    }

    fn spec(name: &'static str, sectors: u64, offset: u64) -> LegSpec {
        LegSpec {
            device: Arc::new(FixedDevice { name, sectors }),
            offset,
        }
    }

    fn mirror(legs: usize, synced: bool, handle_errors: bool) -> Arc<MirrorSet> {
        let specs = (0..legs).map(|_| spec("dev", 64, 0)).collect();
        MirrorSet::create(
            specs,
            24,
            Arc::new(StubTracker {
                region_size: 8,
                nr_regions: 3,
                synced: if synced { 3 } else { 0 },
            }),
            Arc::new(NullCopier),
            MirrorOptions {
                handle_errors,
                events: None,
            },
        )
        .expect("create")
    }

    fn create_err(
        legs: Vec<LegSpec>,
        target_len: u64,
        region_size: u64,
        nr_regions: u64,
    ) -> MirrorError {
        MirrorSet::create(
            legs,
            target_len,
            Arc::new(StubTracker {
                region_size,
                nr_regions,
                synced: 0,
            }),
            Arc::new(NullCopier),
            MirrorOptions::default(),
        )
        .expect_err("creation must fail")
    }

    #[test]
    fn create_validates_geometry() {
        let err = create_err(vec![spec("a", 64, 0)], 24, 8, 3);
        assert_eq!(err.kind(), MirrorErrorKind::InvalidArgument);

        let err = create_err(vec![spec("a", 64, 0), spec("b", 64, 0)], 0, 8, 3);
        assert_eq!(err.kind(), MirrorErrorKind::InvalidArgument);

        // region size not a power of two
        let err = create_err(vec![spec("a", 64, 0), spec("b", 64, 0)], 24, 6, 4);
        assert_eq!(err.kind(), MirrorErrorKind::InvalidArgument);

        // tracker geometry disagrees with the target length
        let err = create_err(vec![spec("a", 64, 0), spec("b", 64, 0)], 24, 8, 5);
        assert_eq!(err.kind(), MirrorErrorKind::InvalidArgument);

        // second leg cannot address offset + target_len
        let err = create_err(vec![spec("a", 64, 0), spec("b", 64, 48)], 24, 8, 3);
        assert_eq!(err.kind(), MirrorErrorKind::DeviceLookup);
    }

    #[test]
    fn choose_mirror_scans_backward_from_primary() {
        let ms = mirror(3, true, true);
        assert_eq!(ms.choose_mirror(0), Some(0));
        ms.set_primary(1);
        assert_eq!(ms.choose_mirror(500), Some(1));

        ms.leg(1).record_fault(Fault::Write);
        assert_eq!(ms.choose_mirror(0), Some(0));
        ms.leg(0).record_fault(Fault::Write);
        assert_eq!(ms.choose_mirror(0), Some(2));
        ms.leg(2).record_fault(Fault::Write);
        assert_eq!(ms.choose_mirror(0), None);
    }

    #[test]
    fn get_valid_mirror_prefers_array_order() {
        let ms = mirror(3, true, true);
        assert_eq!(ms.get_valid_mirror(), Some(0));
        ms.leg(0).record_fault(Fault::Read);
        assert_eq!(ms.get_valid_mirror(), Some(1));
    }

    #[test]
    fn primary_failure_re_elects_when_synced() {
        let ms = mirror(2, true, true);
        ms.fail_leg(0, Fault::Write);
        assert_eq!(ms.primary(), 1);
        assert!(ms.any_leg_failed());
    }

    #[test]
    fn primary_sticks_before_initial_sync() {
        let ms = mirror(2, false, true);
        assert!(!ms.in_sync());
        ms.fail_leg(0, Fault::Write);
        assert_eq!(ms.primary(), 0);
    }

    #[test]
    fn primary_sticks_without_error_handling() {
        let ms = mirror(2, true, false);
        ms.fail_leg(0, Fault::Write);
        assert_eq!(ms.primary(), 0);
    }

    #[test]
    fn misaligned_writes_are_rejected() {
        let ms = mirror(2, true, false);
        let mut rx = ms.write(0, vec![0u8; 100]);
        assert!(matches!(rx.try_recv(), Ok(Some(IoOutcome::Failed))));
    }

    #[test]
    fn submissions_after_shutdown_are_refused() {
        let ms = mirror(2, true, false);
        ms.shutdown();
        let mut rx = ms.read(0, 1);
        assert!(matches!(rx.try_recv(), Ok(Some(IoOutcome::ShuttingDown))));
    }

    #[test]
    fn plain_suspend_diverts_submissions_to_failure() {
        let ms = mirror(2, true, false);
        block_on(ms.suspend(false));
        assert!(ms.is_suspended());
        let mut rx = ms.read(0, 1);
        assert!(matches!(rx.try_recv(), Ok(Some(IoOutcome::Failed))));
        ms.resume();
        assert!(!ms.is_suspended());
    }

    #[test]
    fn log_failure_latches_once() {
        let ms = mirror(2, true, true);
        assert!(!ms.log_failed());
        ms.record_log_failure();
        ms.record_log_failure();
        assert!(ms.log_failed());
    }

    #[test]
    fn status_reports_legs_and_sync_counts() {
        let ms = mirror(2, true, true);
        assert_eq!(ms.status(StatusKind::Info), "2 dev dev 3/3 1 AA stub");
        assert_eq!(ms.status(StatusKind::Table), "stub 2 dev 0 dev 0 1 handle_errors");
    }
}

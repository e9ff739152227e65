use futures_util::future;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::device::{DeviceResult, SECTOR_SIZE};
use crate::io::{IoKind, IoOutcome, PendingIo};
use crate::leg::Fault;
use crate::mirror::MirrorSet;

/// Drives a mirror set: waits for wakeups and runs one drain activation at
/// a time. Spawn [`MirrorWorker::run`] on the runtime of your choice;
/// holding the only drain loop is what guarantees the single-activation
/// contract.
pub struct MirrorWorker {
    mirror: Arc<MirrorSet>,
}

impl MirrorSet {
    pub fn worker(self: &Arc<Self>) -> MirrorWorker {
        MirrorWorker {
            mirror: Arc::clone(self),
        }
    }
}

impl MirrorWorker {
    pub async fn run(self) {
        debug!("mirror worker started");
        loop {
            self.mirror.wake_signal.notified().await;
            if self.mirror.is_shutting_down() {
                break;
            }
            self.mirror.do_mirror().await;
            if self.mirror.is_shutting_down() {
                break;
            }
        }
        self.mirror.drain_for_shutdown();
        debug!("mirror worker stopped");
    }
}

impl MirrorSet {
    /// One activation of the dispatch loop. Snapshots the queues under the
    /// lock, then processes everything without holding it: fold recovery
    /// results into region state, kick recovery, then reads, writes and
    /// failure processing. Individual requests fail; the activation itself
    /// never does, and running it with empty queues is a no-op.
    pub(crate) async fn do_mirror(self: &Arc<Self>) {
        let batch = self.lock_queues().take_batch();

        let released = self.tracker().update_states(self.handle_errors());
        for io in released {
            self.queue_write(io);
        }

        self.do_recovery();
        self.do_reads(batch.reads);
        self.do_writes(batch.writes).await;
        self.do_failures(batch.failures);
        self.notify_quiesce();
    }

    fn do_reads(self: &Arc<Self>, reads: VecDeque<PendingIo>) {
        for io in reads {
            let region = self.tracker().region_of(io.sector());
            // Reads are only served from in-sync regions; an out-of-sync
            // or recovering region has no leg guaranteed to hold the data.
            let in_sync = self.tracker().state(region).in_sync()
                && !self.tracker().is_remote_recovering(region);
            let leg = if in_sync {
                self.choose_mirror(io.sector())
            } else {
                None
            };
            match leg {
                Some(idx) => self.read_async(io, idx),
                None => self.end_io(io, IoOutcome::Failed),
            }
        }
    }

    fn read_async(self: &Arc<Self>, io: PendingIo, leg_idx: usize) {
        self.io_started();
        let ms = Arc::clone(self);
        tokio::spawn(async move {
            let leg = ms.leg(leg_idx);
            let mut buf = vec![0u8; io.byte_len()];
            let res = leg
                .device()
                .read_sectors(leg.map_sector(io.sector()), &mut buf)
                .await;
            ms.read_complete(io, leg_idx, res.map(|()| buf));
            ms.io_finished();
        });
    }

    /// Read completion: failure latches a read fault and replays the
    /// request from its original state against an alternate leg while one
    /// exists.
    fn read_complete(&self, io: PendingIo, leg_idx: usize, res: DeviceResult<Vec<u8>>) {
        match res {
            Ok(data) => self.end_io(io, IoOutcome::Done(Some(data))),
            Err(err) => {
                warn!(
                    leg = leg_idx,
                    sector = io.sector(),
                    %err,
                    "read failed"
                );
                self.fail_leg(leg_idx, Fault::Read);
                let region = self.tracker().region_of(io.sector());
                let primary_ok = self.leg(self.primary()).is_healthy();
                let alternative = self.tracker().state(region).in_sync()
                    && self.choose_mirror(io.sector()).is_some();
                if primary_ok || alternative {
                    debug!(sector = io.sector(), "requeueing failed read");
                    self.queue_read(io);
                } else {
                    self.end_io(io, IoOutcome::Failed);
                }
            }
        }
    }

    async fn do_writes(self: &Arc<Self>, writes: VecDeque<PendingIo>) {
        if writes.is_empty() {
            return;
        }
        let mut sync = Vec::new();
        let mut nosync = Vec::new();
        let mut recovering = Vec::new();
        for io in writes {
            match io.kind() {
                // Flushes and discards replicate everywhere regardless of
                // region state.
                IoKind::Flush | IoKind::Discard => sync.push(io),
                _ => {
                    let region = self.tracker().region_of(io.sector());
                    if self.tracker().is_remote_recovering(region) {
                        recovering.push(io);
                        continue;
                    }
                    match self.tracker().state(region) {
                        s if s.in_sync() => sync.push(io),
                        crate::regions::RegionState::Recovering => recovering.push(io),
                        _ => nosync.push(io),
                    }
                }
            }
        }

        for io in recovering {
            let region = self.tracker().region_of(io.sector());
            if let Some(io) = self.tracker().delay(region, io) {
                // Recovery finished in the meantime; classify again on the
                // next activation.
                self.queue_write(io);
            }
        }

        // Pending references must be taken before any leg sees the write,
        // so a concurrent suspend can wait for the region to drain.
        for io in sync.iter_mut().chain(nosync.iter_mut()) {
            if io.kind() == IoKind::Write {
                self.tracker().inc_pending(self.tracker().region_of(io.sector()));
                io.pending_marked = true;
            }
        }

        // Dirty marks become durable before data hits the legs. The log
        // failure latch is sticky across later successful flushes.
        if self.tracker().flush().await.is_err() {
            self.record_log_failure();
        }

        if self.log_failed() && self.handle_errors() {
            for io in sync {
                self.queue_failure(io);
            }
        } else {
            for io in sync {
                self.do_write(io);
            }
        }

        for io in nosync {
            if self.any_leg_failed() && self.handle_errors() {
                // A leg already failed; the region is out of sync anyway,
                // so route straight to failure processing.
                self.queue_failure(io);
            } else {
                self.do_write_primary(io);
            }
        }
    }

    /// Fan a sync-class request out to every leg as one batch with a joint
    /// completion carrying a per-leg error bitmask.
    fn do_write(self: &Arc<Self>, io: PendingIo) {
        debug_assert!(io.kind() != IoKind::Read);
        self.io_started();
        let ms = Arc::clone(self);
        tokio::spawn(async move {
            let kind = io.kind();
            let sector = io.sector();
            let count = io.count();
            let payload = io.payload.clone();
            let sub_ios = ms
                .legs()
                .iter()
                .enumerate()
                .map(|(idx, leg)| {
                    let payload = payload.clone();
                    async move {
                        let res = match kind {
                            IoKind::Write => {
                                let data: &[u8] =
                                    payload.as_deref().map(Vec::as_slice).unwrap_or(&[]);
                                leg.device()
                                    .write_sectors(leg.map_sector(sector), data)
                                    .await
                            }
                            IoKind::Flush => leg.device().flush().await,
                            IoKind::Discard => {
                                leg.device().discard(leg.map_sector(sector), count).await
                            }
                            IoKind::Read => Ok(()),
                        };
                        (idx, res)
                    }
                })
                .collect::<Vec<_>>();

            let mut error_bits = 0u64;
            for (idx, res) in future::join_all(sub_ios).await {
                if let Err(err) = res {
                    debug!(leg = idx, sector, %err, "leg write failed");
                    error_bits |= 1 << idx;
                }
            }
            ms.write_complete(io, error_bits);
            ms.io_finished();
        });
    }

    fn write_complete(&self, io: PendingIo, error_bits: u64) {
        if error_bits == 0 {
            self.end_io(io, IoOutcome::Done(None));
            return;
        }
        let fault = match io.kind() {
            IoKind::Flush => Fault::Flush,
            _ => Fault::Write,
        };
        for idx in 0..self.leg_count() {
            if error_bits & (1 << idx) != 0 {
                self.fail_leg(idx, fault);
            }
        }
        // Failure disposition can block on administrative decisions, so it
        // runs on the dispatch loop, not here.
        self.queue_failure(io);
    }

    /// Writes to not-yet-synchronized regions only touch the primary; the
    /// other legs will be overwritten by recovery anyway.
    fn do_write_primary(self: &Arc<Self>, io: PendingIo) {
        self.io_started();
        let primary = self.primary();
        let ms = Arc::clone(self);
        tokio::spawn(async move {
            let leg = ms.leg(primary);
            let data: &[u8] = io.payload.as_deref().map(Vec::as_slice).unwrap_or(&[]);
            debug_assert_eq!(data.len(), io.count() as usize * SECTOR_SIZE);
            let res = leg
                .device()
                .write_sectors(leg.map_sector(io.sector()), data)
                .await;
            match res {
                Ok(()) => ms.end_io(io, IoOutcome::Done(None)),
                Err(err) => {
                    warn!(leg = primary, sector = io.sector(), %err, "primary write failed");
                    ms.fail_leg(primary, Fault::Write);
                    ms.queue_failure(io);
                }
            }
            ms.io_finished();
        });
    }

    /// Dispose of requests whose leg I/O already failed: drop the region
    /// out of sync, then fail, hold, or best-effort-complete depending on
    /// configuration and remaining healthy legs.
    fn do_failures(&self, failures: VecDeque<PendingIo>) {
        for io in failures {
            if !self.log_failed() && io.kind() == IoKind::Write {
                self.set_in_sync(false);
                self.tracker()
                    .mark_nosync(self.tracker().region_of(io.sector()));
            }
            if self.get_valid_mirror().is_none() {
                self.end_io(io, IoOutcome::Failed);
            } else if self.handle_errors() {
                self.hold_io(io);
            } else {
                // Best-effort mode: the fault is latched for status
                // reporting but the caller sees success.
                self.end_io(io, IoOutcome::Done(None));
            }
        }
    }

    /// Fail everything still queued, including held I/O and writes parked
    /// on the tracker's delay lists.
    pub(crate) fn drain_for_shutdown(&self) {
        let (batch, holds) = {
            let mut queues = self.lock_queues();
            let batch = queues.take_batch();
            let holds = std::mem::take(&mut queues.holds);
            (batch, holds)
        };
        let delayed = self.tracker().drain_delayed();
        for io in batch
            .reads
            .into_iter()
            .chain(batch.writes)
            .chain(batch.failures)
            .chain(holds)
            .chain(delayed)
        {
            self.end_io(io, IoOutcome::ShuttingDown);
        }
    }
}

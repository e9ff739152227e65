use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::copier::{CopyOutcome, CopyRange};
use crate::leg::Fault;
use crate::mirror::{MirrorEvent, MirrorSet, MAX_RECOVERY};

impl MirrorSet {
    /// Kick off as many region recoveries as the tracker will hand out,
    /// bounded by [`MAX_RECOVERY`] in flight, then publish the global
    /// in-sync transition once every region is synchronized.
    pub(crate) fn do_recovery(self: &Arc<Self>) {
        while self.recoveries.load(Ordering::Acquire) < MAX_RECOVERY {
            let Some(region) = self.tracker().recovery_start() else {
                break;
            };
            self.recoveries.fetch_add(1, Ordering::AcqRel);
            self.recover_region(region);
        }

        if !self.in_sync() && self.tracker().sync_count() == self.tracker().nr_regions() {
            self.set_in_sync(true);
            info!("mirror fully synchronized");
            self.emit(MirrorEvent::FullySynced);
        }
    }

    /// Copy one region from the primary leg to every other leg.
    fn recover_region(self: &Arc<Self>, region: u64) {
        let region_size = self.tracker().region_size();
        let start = region * region_size;
        let count = if region == self.tracker().nr_regions() - 1 {
            let tail = self.target_len() % region_size;
            if tail == 0 {
                region_size
            } else {
                tail
            }
        } else {
            region_size
        };

        // The primary is sampled once so the destination index mapping
        // stays valid even if re-election happens mid-copy.
        let primary = self.primary();
        let from = CopyRange {
            device: Arc::clone(self.leg(primary).device()),
            sector: self.leg(primary).map_sector(start),
            count,
        };
        let to: Vec<CopyRange> = self
            .legs()
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != primary)
            .map(|(_, leg)| CopyRange {
                device: Arc::clone(leg.device()),
                sector: leg.map_sector(start),
                count,
            })
            .collect();
        let ignore_errors = !self.handle_errors();
        debug!(region, start, count, primary, "recovering region");

        let ms = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = ms.copier().copy(from, to, ignore_errors).await;
            ms.recovery_complete(region, primary, outcome);
        });
    }

    /// Completion side of a region copy: translate error bits back onto
    /// legs, report the result to the tracker, and reschedule the worker.
    fn recovery_complete(&self, region: u64, primary: usize, outcome: CopyOutcome) {
        if outcome.read_error {
            warn!(region, primary, "recovery read failed on primary leg");
            self.fail_leg(primary, Fault::Sync);
        }
        if outcome.write_errors != 0 {
            // Destination i is the i-th leg that is not the primary, in
            // array order.
            let mut dest = 0;
            for leg_idx in 0..self.leg_count() {
                if leg_idx == primary {
                    continue;
                }
                if outcome.write_errors & (1 << dest) != 0 {
                    warn!(region, leg = leg_idx, "recovery write failed");
                    self.fail_leg(leg_idx, Fault::Sync);
                }
                dest += 1;
            }
        }
        self.tracker().recovery_end(region, outcome.ok());
        self.recoveries.fetch_sub(1, Ordering::AcqRel);
        self.notify_quiesce();
        self.wake();
    }
}

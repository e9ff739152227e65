use tracing::{error, warn};

use crate::leg::Fault;
use crate::mirror::{MirrorEvent, MirrorSet};

impl MirrorSet {
    /// Pick a leg to serve a read. Scans backward circularly from the
    /// current primary and returns the first healthy leg. The starting
    /// sector is accepted for interface symmetry with sector-sharding
    /// designs but does not influence the scan.
    pub fn choose_mirror(&self, _seed: u64) -> Option<usize> {
        let n = self.leg_count();
        let start = self.primary();
        (0..n)
            .map(|i| (start + n - i) % n)
            .find(|&idx| self.leg(idx).is_healthy())
    }

    /// First healthy leg in array order, used for primary re-election.
    pub fn get_valid_mirror(&self) -> Option<usize> {
        (0..self.leg_count()).find(|&idx| self.leg(idx).is_healthy())
    }

    /// Record a fault against a leg and, when the primary is affected,
    /// re-elect a new one.
    ///
    /// Each error class latches once per leg; repeated reports of the same
    /// class only bump the error counter. Re-election happens only when
    /// error handling is enabled and the mirror has completed its initial
    /// sync; before that the other legs cannot be trusted to hold valid
    /// data.
    pub(crate) fn fail_leg(&self, leg_idx: usize, fault: Fault) {
        self.record_leg_failure();
        let newly_latched = self.leg(leg_idx).record_fault(fault);
        if !newly_latched {
            return;
        }
        warn!(
            leg = leg_idx,
            device = self.leg(leg_idx).name(),
            ?fault,
            "mirror leg failed"
        );
        self.emit(MirrorEvent::LegDegraded {
            leg: leg_idx,
            fault,
        });

        if !self.handle_errors() {
            // Fault recorded for status reporting only.
            return;
        }
        if leg_idx != self.primary() {
            return;
        }
        if !self.in_sync() {
            warn!("primary leg failed before initial sync completed; reads may fail");
            return;
        }
        match self.get_valid_mirror() {
            Some(new_primary) => {
                self.set_primary(new_primary);
                warn!(
                    from = leg_idx,
                    to = new_primary,
                    "re-elected mirror primary"
                );
                self.emit(MirrorEvent::PrimaryChanged {
                    from: leg_idx,
                    to: new_primary,
                });
            }
            None => {
                error!("all mirror legs have failed");
                self.emit(MirrorEvent::AllLegsFailed);
            }
        }
    }
}

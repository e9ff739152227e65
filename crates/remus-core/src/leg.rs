use crate::device::LegDevice;
use std::sync::{
    atomic::{AtomicU32, AtomicU8, Ordering},
    Arc,
};

/// Error classes latched per leg. Each class is a one-shot latch: once
/// recorded it stays set until the mirror set is torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Write,
    Flush,
    Sync,
    Read,
}

impl Fault {
    fn bit(self) -> u8 {
        match self {
            Fault::Write => 1 << 0,
            Fault::Flush => 1 << 1,
            Fault::Sync => 1 << 2,
            Fault::Read => 1 << 3,
        }
    }
}

/// One physical replica of the mirrored target.
///
/// Legs are owned by the mirror set and referenced by index everywhere;
/// the index is stable for the mirror set's lifetime.
pub struct Leg {
    device: Arc<dyn LegDevice>,
    offset: u64,
    error_count: AtomicU32,
    faults: AtomicU8,
}

impl Leg {
    pub(crate) fn new(device: Arc<dyn LegDevice>, offset: u64) -> Self {
        Self {
            device,
            offset,
            error_count: AtomicU32::new(0),
            faults: AtomicU8::new(0),
        }
    }

    pub fn device(&self) -> &Arc<dyn LegDevice> {
        &self.device
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Translate a logical target sector into this leg's device space.
    pub fn map_sector(&self, sector: u64) -> u64 {
        self.offset + sector
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    /// A leg is eligible for reads and recovery sourcing only while its
    /// error counter has never moved.
    pub fn is_healthy(&self) -> bool {
        self.error_count() == 0
    }

    pub fn has_fault(&self, fault: Fault) -> bool {
        self.faults.load(Ordering::Acquire) & fault.bit() != 0
    }

    /// Record a fault against this leg. The error counter always moves;
    /// the return value is `true` only the first time this class latches.
    pub(crate) fn record_fault(&self, fault: Fault) -> bool {
        self.error_count.fetch_add(1, Ordering::AcqRel);
        let prev = self.faults.fetch_or(fault.bit(), Ordering::AcqRel);
        prev & fault.bit() == 0
    }

    /// Single-character health code used in status lines.
    pub fn health_char(&self) -> char {
        if self.error_count() == 0 {
            return 'A';
        }
        if self.has_fault(Fault::Flush) {
            'F'
        } else if self.has_fault(Fault::Write) {
            'D'
        } else if self.has_fault(Fault::Sync) {
            'S'
        } else if self.has_fault(Fault::Read) {
            'R'
        } else {
            'U'
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceResult, LegDevice};
    use async_trait::async_trait;

    struct NullDevice;

    #[async_trait]
    impl LegDevice for NullDevice {
        fn name(&self) -> &str {
            "null"
        }

        fn total_sectors(&self) -> u64 {
            0
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

    fn leg() -> Leg {
        Leg::new(Arc::new(NullDevice), 16)
    }

    #[test]
    fn fault_latch_is_one_shot_per_class() {
        let leg = leg();
        assert!(leg.record_fault(Fault::Write));
        assert!(!leg.record_fault(Fault::Write));
        assert!(leg.record_fault(Fault::Read));
        assert_eq!(leg.error_count(), 3);
    }

    #[test]
    fn health_char_priority() {
        let leg = leg();
        assert_eq!(leg.health_char(), 'A');
        leg.record_fault(Fault::Read);
        assert_eq!(leg.health_char(), 'R');
        leg.record_fault(Fault::Sync);
        assert_eq!(leg.health_char(), 'S');
        leg.record_fault(Fault::Write);
        assert_eq!(leg.health_char(), 'D');
        leg.record_fault(Fault::Flush);
        assert_eq!(leg.health_char(), 'F');
    }

    #[test]
    fn sector_mapping_applies_offset() {
        let leg = leg();
        assert_eq!(leg.map_sector(0), 16);
        assert_eq!(leg.map_sector(100), 116);
    }
}

use async_trait::async_trait;
use remus_core::{DeviceError, DeviceErrorKind, DeviceResult, LegDevice, SECTOR_SIZE};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex,
};

/// Memory-backed mirror leg with fault injection, used by tests and demos.
pub struct MemLeg {
    name: String,
    data: Mutex<Vec<u8>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_flushes: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    flushes: AtomicU64,
}

impl MemLeg {
    pub fn new(name: impl Into<String>, sectors: u64) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(vec![0u8; sectors as usize * SECTOR_SIZE]),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_flushes: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn fail_flushes(&self, fail: bool) {
        self.fail_flushes.store(fail, Ordering::Relaxed);
    }

    /// Number of successful sector reads served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of successful sector writes absorbed so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Snapshot of a sector's contents.
    pub fn sector(&self, sector: u64) -> Vec<u8> {
        let data = self.lock();
        let start = sector as usize * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].to_vec()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_range(&self, sector: u64, buf_len: usize) -> DeviceResult<usize> {
        if buf_len == 0 || !buf_len.is_multiple_of(SECTOR_SIZE) {
            return Err(DeviceError::with_message(
                DeviceErrorKind::InvalidInput,
                "buffer length must be a non-zero multiple of the sector size",
            ));
        }
        let start = sector as usize * SECTOR_SIZE;
        let total = self.lock().len();
        if start + buf_len > total {
            return Err(DeviceError::with_message(
                DeviceErrorKind::OutOfRange,
                format!("sector range {sector}+{} past device end", buf_len / SECTOR_SIZE),
            ));
        }
        Ok(start)
    }
}

#[async_trait]
impl LegDevice for MemLeg {
    fn name(&self) -> &str {
        &self.name
    }

    fn total_sectors(&self) -> u64 {
        (self.lock().len() / SECTOR_SIZE) as u64
    }

    async fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> DeviceResult<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(DeviceError::with_message(
                DeviceErrorKind::Io,
                "injected read failure",
            ));
        }
        let start = self.check_range(sector, buf.len())?;
        let data = self.lock();
        buf.copy_from_slice(&data[start..start + buf.len()]);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn write_sectors(&self, sector: u64, buf: &[u8]) -> DeviceResult<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(DeviceError::with_message(
                DeviceErrorKind::Io,
                "injected write failure",
            ));
        }
        let start = self.check_range(sector, buf.len())?;
        let mut data = self.lock();
        data[start..start + buf.len()].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> DeviceResult<()> {
        if self.fail_flushes.load(Ordering::Relaxed) {
            return Err(DeviceError::with_message(
                DeviceErrorKind::Io,
                "injected flush failure",
            ));
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

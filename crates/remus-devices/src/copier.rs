use async_trait::async_trait;
use remus_core::{CopyEngine, CopyOutcome, CopyRange, SECTOR_SIZE};
use tracing::warn;

/// Default number of sectors moved per copy chunk (64 KiB).
pub const DEFAULT_CHUNK_SECTORS: u64 = 128;

/// Copy engine that reads each chunk once from the source and fans it out
/// to every destination that has not already failed.
pub struct SectorCopier {
    chunk_sectors: u64,
}

impl SectorCopier {
    pub fn new() -> Self {
        Self {
            chunk_sectors: DEFAULT_CHUNK_SECTORS,
        }
    }

    pub fn with_chunk_sectors(chunk_sectors: u64) -> Self {
        Self {
            chunk_sectors: chunk_sectors.max(1),
        }
    }

    async fn copy_inner(&self, from: &CopyRange, to: &[CopyRange]) -> CopyOutcome {
        let mut outcome = CopyOutcome::default();
        let mut done = 0u64;
        while done < from.count {
            let chunk = self.chunk_sectors.min(from.count - done);
            let mut buf = vec![0u8; chunk as usize * SECTOR_SIZE];
            if let Err(err) = from.device.read_sectors(from.sector + done, &mut buf).await {
                warn!(
                    device = from.device.name(),
                    sector = from.sector + done,
                    %err,
                    "copy source read failed"
                );
                outcome.read_error = true;
                return outcome;
            }
            for (idx, dest) in to.iter().enumerate() {
                if outcome.write_errors & (1 << idx) != 0 {
                    continue;
                }
                if let Err(err) = dest.device.write_sectors(dest.sector + done, &buf).await {
                    warn!(
                        device = dest.device.name(),
                        sector = dest.sector + done,
                        %err,
                        "copy destination write failed"
                    );
                    outcome.write_errors |= 1 << idx;
                }
            }
            done += chunk;
        }
        outcome
    }
}

impl Default for SectorCopier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CopyEngine for SectorCopier {
    async fn copy(&self, from: CopyRange, to: Vec<CopyRange>, ignore_errors: bool) -> CopyOutcome {
        let outcome = self.copy_inner(&from, &to).await;
        if ignore_errors {
            CopyOutcome::default()
        } else {
            outcome
        }
    }
}

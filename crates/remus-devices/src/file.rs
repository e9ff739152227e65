use anyhow::{Context, Result};
use async_trait::async_trait;
use remus_core::{DeviceError, DeviceErrorKind, DeviceResult, LegDevice, SECTOR_SIZE};
use std::{
    io,
    os::unix::fs::FileExt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{fs::OpenOptions, task};
use tracing::debug;

/// Mirror leg backed by a regular file or a block device node.
pub struct FileLeg {
    file: std::fs::File,
    len: AtomicU64,
    writable: bool,
    name: String,
}

impl FileLeg {
    /// Open a file-backed leg, falling back to read-only when the path
    /// cannot be opened for writing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_display = path.display().to_string();
        let rw_result = OpenOptions::new().read(true).write(true).open(path).await;

        let (file, writable) = match rw_result {
            Ok(file) => (file, true),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem
                ) =>
            {
                let file = OpenOptions::new()
                    .read(true)
                    .open(path)
                    .await
                    .with_context(|| format!("open {} read-only", path_display))?;
                debug!(path = %path_display, "opened mirror leg read-only");
                (file, false)
            }
            Err(err) => {
                return Err(err).context(format!("open {}", path_display));
            }
        };

        let len = file
            .metadata()
            .await
            .with_context(|| format!("stat {}", path_display))?
            .len();
        let file = file.into_std().await;
        if writable {
            debug!(path = %path_display, len, "opened mirror leg read-write");
        }

        Ok(Self {
            file,
            len: AtomicU64::new(len),
            writable,
            name: path_display,
        })
    }

    fn ensure_aligned(buf_len: usize) -> DeviceResult<()> {
        if buf_len == 0 || !buf_len.is_multiple_of(SECTOR_SIZE) {
            return Err(DeviceError::with_message(
                DeviceErrorKind::InvalidInput,
                "buffer length must be a non-zero multiple of the sector size",
            ));
        }
        Ok(())
    }

    fn byte_offset(sector: u64) -> DeviceResult<u64> {
        sector.checked_mul(SECTOR_SIZE as u64).ok_or_else(|| {
            DeviceError::with_message(DeviceErrorKind::OutOfRange, "sector offset overflow")
        })
    }

    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let file = self.file.try_clone()?;
        let len = buf.len();
        let tmp = task::spawn_blocking(move || {
            let mut tmp = vec![0u8; len];
            let mut read = 0;
            while read < len {
                let n = file.read_at(&mut tmp[read..], offset + read as u64)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "short read from mirror leg",
                    ));
                }
                read += n;
            }
            Ok::<_, io::Error>(tmp)
        })
        .await
        .map_err(|err| io::Error::other(err.to_string()))??;
        buf.copy_from_slice(&tmp);
        Ok(())
    }

    async fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "mirror leg opened in read-only mode",
            ));
        }
        let file = self.file.try_clone()?;
        let data = buf.to_vec();
        let len = data.len();
        task::spawn_blocking(move || {
            let mut written = 0;
            while written < len {
                let n = file.write_at(&data[written..], offset + written as u64)?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "short write to mirror leg",
                    ));
                }
                written += n;
            }
            Ok(())
        })
        .await
        .unwrap_or_else(|err| Err(io::Error::other(err.to_string())))?;

        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write offset overflow"))?;
        self.len.fetch_max(end, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl LegDevice for FileLeg {
    fn name(&self) -> &str {
        &self.name
    }

    fn total_sectors(&self) -> u64 {
        self.len.load(Ordering::Relaxed) / SECTOR_SIZE as u64
    }

    async fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> DeviceResult<()> {
        Self::ensure_aligned(buf.len())?;
        let offset = Self::byte_offset(sector)?;
        self.read_at(offset, buf).await.map_err(crate::io_error)
    }

    async fn write_sectors(&self, sector: u64, buf: &[u8]) -> DeviceResult<()> {
        Self::ensure_aligned(buf.len())?;
        let offset = Self::byte_offset(sector)?;
        self.write_at(offset, buf).await.map_err(crate::io_error)
    }

    async fn flush(&self) -> DeviceResult<()> {
        let file = self.file.try_clone().map_err(crate::io_error)?;
        task::spawn_blocking(move || file.sync_data())
            .await
            .unwrap_or_else(|err| Err(io::Error::other(format!("flush join error: {err}"))))
            .map_err(crate::io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Runtime::new().expect("runtime")
    }

    #[test]
    fn round_trips_sectors() {
        let mut tmp = NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0u8; 4 * SECTOR_SIZE]).expect("seed");
        let rt = runtime();
        rt.block_on(async {
            let leg = FileLeg::open(tmp.path()).await.expect("open");
            assert_eq!(leg.total_sectors(), 4);

            let payload = vec![0xabu8; 2 * SECTOR_SIZE];
            leg.write_sectors(1, &payload).await.expect("write");
            let mut back = vec![0u8; 2 * SECTOR_SIZE];
            leg.read_sectors(1, &mut back).await.expect("read");
            assert_eq!(back, payload);
            leg.flush().await.expect("flush");
        });
    }

    #[test]
    fn rejects_misaligned_buffers() {
        let mut tmp = NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0u8; SECTOR_SIZE]).expect("seed");
        let rt = runtime();
        rt.block_on(async {
            let leg = FileLeg::open(tmp.path()).await.expect("open");
            let mut buf = vec![0u8; 100];
            let err = leg.read_sectors(0, &mut buf).await.expect_err("misaligned");
            assert_eq!(err.kind(), DeviceErrorKind::InvalidInput);
        });
    }

    #[test]
    fn read_past_end_is_io_error() {
        let mut tmp = NamedTempFile::new().expect("tempfile");
        tmp.write_all(&vec![0u8; SECTOR_SIZE]).expect("seed");
        let rt = runtime();
        rt.block_on(async {
            let leg = FileLeg::open(tmp.path()).await.expect("open");
            let mut buf = vec![0u8; SECTOR_SIZE];
            let err = leg.read_sectors(8, &mut buf).await.expect_err("past end");
            assert_eq!(err.kind(), DeviceErrorKind::Io);
        });
    }
}

use async_trait::async_trait;
use std::fmt;

/// Logical sector size in bytes. All offsets and lengths in this crate are
/// expressed in units of this.
pub const SECTOR_SIZE: usize = 512;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Describes the failure category for leg device operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceErrorKind {
    InvalidInput,
    OutOfRange,
    Io,
    Unsupported,
    Other,
}

/// Error surfaced by [`LegDevice`] implementations.
#[derive(Clone, Debug)]
pub struct DeviceError {
    kind: DeviceErrorKind,
    message: Option<String>,
}

impl DeviceError {
    pub const fn new(kind: DeviceErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn with_message(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    pub fn kind(&self) -> DeviceErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) => write!(f, "{:?}: {msg}", self.kind),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Abstraction over one physical backing store of a mirror leg.
///
/// Implementations operate on 512-byte sectors; buffers passed to
/// `read_sectors`/`write_sectors` must be exact multiples of [`SECTOR_SIZE`].
#[async_trait]
pub trait LegDevice: Send + Sync {
    /// Stable human-readable name, used in status lines and log output.
    fn name(&self) -> &str;

    /// Total addressable size in sectors.
    fn total_sectors(&self) -> u64;

    /// Read `buf.len() / SECTOR_SIZE` sectors starting at `sector`.
    async fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> DeviceResult<()>;

    /// Write `buf.len() / SECTOR_SIZE` sectors starting at `sector`.
    async fn write_sectors(&self, sector: u64, buf: &[u8]) -> DeviceResult<()>;

    /// Flush outstanding writes to durable media.
    async fn flush(&self) -> DeviceResult<()>;

    /// Hint that the given sector range may be discarded.
    async fn discard(&self, _sector: u64, _count: u64) -> DeviceResult<()> {
        Ok(())
    }
}

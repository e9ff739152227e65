//! Core of a userspace mirrored (RAID1) block target.
//!
//! A [`MirrorSet`] replicates writes across N legs, serves reads from a
//! healthy leg, tracks per-region synchronization through a pluggable
//! [`RegionTracker`], and resynchronizes out-of-sync regions from the
//! primary leg via a [`CopyEngine`]. All I/O is asynchronous; a single
//! [`MirrorWorker`] drains the pending queues one activation at a time.

pub mod copier;
pub mod device;
mod dispatch;
pub mod error;
pub mod io;
pub mod leg;
mod failure;
pub mod mirror;
mod recovery;
pub mod regions;

pub use copier::{CopyEngine, CopyOutcome, CopyRange, MAX_COPY_DESTS};
pub use device::{DeviceError, DeviceErrorKind, DeviceResult, LegDevice, SECTOR_SIZE};
pub use dispatch::MirrorWorker;
pub use error::{MirrorError, MirrorErrorKind, MirrorResult};
pub use io::{IoKind, IoOutcome, PendingIo};
pub use leg::{Fault, Leg};
pub use mirror::{LegSpec, MirrorEvent, MirrorOptions, MirrorSet, StatusKind, MAX_LEGS};
pub use regions::{RegionState, RegionTracker};

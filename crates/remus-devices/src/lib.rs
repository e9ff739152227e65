//! Concrete leg devices and the default copy engine for the mirror core.

mod copier;
mod file;
mod mem;

pub use copier::SectorCopier;
pub use file::FileLeg;
pub use mem::MemLeg;

use remus_core::{DeviceError, DeviceErrorKind};
use std::io;

pub(crate) fn io_error(err: io::Error) -> DeviceError {
    DeviceError::with_message(DeviceErrorKind::Io, err.to_string())
}

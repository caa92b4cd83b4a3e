// SPDX-License-Identifier: AGPL-3.0-only

//! Memory-mapped register window
//!
//! Shared by the PCIe and memory-bus backends. The only unsafe code in
//! the driver lives here: one `mmap`, one `munmap` and bounds-checked
//! volatile 32-bit accesses.

use crate::error::{DriverError, Result};
use fpgabus_chip::bar::REGISTER_BYTES;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

const PAGE_SIZE: u64 = 4096;

/// A device file region mapped read/write and shared
#[derive(Debug)]
pub struct MappedWindow {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    path: PathBuf,
}

impl MappedWindow {
    /// Map `len` bytes of `path` starting at `offset`
    ///
    /// With `len == None` the whole file is mapped (sysfs `resourceN`).
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if `path` does not exist, `InvalidArgument`
    /// for an unaligned offset or empty region, and `Io` / `Backend` if
    /// opening or mapping fails.
    pub fn open(path: impl AsRef<Path>, offset: u64, len: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DriverError::device_not_found(path));
        }
        if offset % PAGE_SIZE != 0 {
            return Err(DriverError::invalid_argument(format!(
                "map offset {offset:#x} is not page aligned"
            )));
        }

        tracing::debug!("Mapping {} at {offset:#x}", path.display());

        let file = OpenOptions::new().read(true).write(true).open(path)?;

        // Truncation acceptable: BAR sizes fit in usize on 64-bit targets
        #[allow(clippy::cast_possible_truncation)]
        let size = match len {
            Some(len) => len,
            None => file.metadata()?.len() as usize,
        };
        if size == 0 {
            return Err(DriverError::invalid_argument(format!(
                "{} maps zero bytes (device not enabled?)",
                path.display()
            )));
        }

        // SAFETY: the fd was just opened read/write and stays open for the
        // lifetime of the mapping (stored in `_file`); size is non-zero and
        // offset page aligned; the mapping is released in Drop.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                offset,
            )
        }
        .map_err(|e| DriverError::backend(format!("mmap {} failed: {e}", path.display())))?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| DriverError::backend("mmap returned a null mapping"))?;

        tracing::info!("Mapped {} ({size:#x} bytes at {ptr:p})", path.display());

        Ok(Self {
            ptr,
            size,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    fn check(&self, offset: u32) -> Result<usize> {
        let start = offset as usize;
        if start % REGISTER_BYTES as usize != 0 {
            return Err(DriverError::invalid_argument(format!(
                "unaligned register offset {offset:#x}"
            )));
        }
        if start + REGISTER_BYTES as usize > self.size {
            return Err(DriverError::out_of_range(offset, self.size()));
        }
        Ok(start)
    }

    /// Volatile 32-bit read
    ///
    /// # Errors
    ///
    /// Returns error for an unaligned or out-of-bounds offset.
    pub fn read_u32(&self, offset: u32) -> Result<u32> {
        let start = self.check(offset)?;
        // SAFETY: `check` keeps start..start+4 inside the mapping and 4-byte
        // aligned; the mapping is live while `self` is. Volatile because
        // device registers have side effects.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(start).cast::<u32>().read_volatile() };
        Ok(u32::from_le(value))
    }

    /// Volatile 32-bit write
    ///
    /// # Errors
    ///
    /// Returns error for an unaligned or out-of-bounds offset.
    pub fn write_u32(&mut self, offset: u32, value: u32) -> Result<()> {
        let start = self.check(offset)?;
        // SAFETY: as in read_u32; `&mut self` gives exclusive access.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr
                .as_ptr()
                .add(start)
                .cast::<u32>()
                .write_volatile(value.to_le());
        }
        Ok(())
    }

    /// Mapped size in bytes (saturated to `u32`)
    pub fn size(&self) -> u32 {
        u32::try_from(self.size).unwrap_or(u32::MAX)
    }

    /// Device file backing the mapping
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {}", self.path.display());
        // SAFETY: ptr and size are exactly what mmap returned and took in
        // open(); nothing can reference the mapping once we are dropped.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: the window exclusively owns its mapping; the raw pointer is only
// dereferenced through bounds-checked methods. Moving it to another thread
// does not invalidate the mapping.
unsafe impl Send for MappedWindow {}

// SAFETY: shared access only performs volatile reads; writes need `&mut`.
unsafe impl Sync for MappedWindow {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_file() {
        let err = MappedWindow::open("/nonexistent/fpgabus/resource0", 0, None).unwrap_err();
        assert!(matches!(err, DriverError::DeviceNotFound { .. }));
    }

    #[test]
    fn unaligned_offset_rejected() {
        let err = MappedWindow::open("/dev/null", 0x10, Some(4096)).unwrap_err();
        assert!(matches!(err, DriverError::InvalidArgument { .. }));
    }
}

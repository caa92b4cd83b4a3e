// SPDX-License-Identifier: AGPL-3.0-only

//! PCIe BAR backend (sysfs `resourceN` mapping)

use super::mmap::MappedWindow;
use crate::backend::{BackendType, RegisterBackend};
use crate::error::Result;

/// PCIe BAR mapped through `/sys/bus/pci/devices/<addr>/resource<N>`
#[derive(Debug)]
pub struct MmioBank {
    window: MappedWindow,
    bar: usize,
}

impl MmioBank {
    /// Map BAR `bar` of the function at `pcie_address`
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if the resource file does not exist, or a
    /// mapping error.
    pub fn map(pcie_address: &str, bar: usize) -> Result<Self> {
        let path = format!("/sys/bus/pci/devices/{pcie_address}/resource{bar}");
        let window = MappedWindow::open(path, 0, None)?;
        tracing::info!("BAR{bar}: {} bytes via {}", window.size(), window.path().display());
        Ok(Self { window, bar })
    }

    /// BAR index
    pub const fn bar(&self) -> usize {
        self.bar
    }
}

impl RegisterBackend for MmioBank {
    fn read(&self, offset: u32) -> Result<u32> {
        let value = self.window.read_u32(offset)?;
        tracing::trace!("BAR{} read @ {offset:#x} = {value:#x}", self.bar);
        Ok(value)
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<()> {
        tracing::trace!("BAR{} write @ {offset:#x} = {value:#x}", self.bar);
        self.window.write_u32(offset, value)
    }

    fn set_mode(&mut self, _offset: u32, _mode: u32) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> u32 {
        self.window.size()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmio
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Memory-bus backend (chip-select window of `/dev/mem`)

use super::mmap::MappedWindow;
use crate::backend::{BackendType, RegisterBackend};
use crate::error::Result;

const DEV_MEM: &str = "/dev/mem";

/// Register window behind one memory-bus chip select
#[derive(Debug)]
pub struct MembusBank {
    window: MappedWindow,
    physical: u64,
}

impl MembusBank {
    /// Map `len` bytes at physical address `physical`
    ///
    /// # Errors
    ///
    /// Returns error if `/dev/mem` is unavailable or the mapping fails.
    pub fn map(physical: u64, len: u32) -> Result<Self> {
        let window = MappedWindow::open(DEV_MEM, physical, Some(len as usize))?;
        tracing::info!(
            "Chip select {physical:#010x} - {:#010x} mapped ({} KByte)",
            physical + u64::from(len) - 1,
            len / 1024
        );
        Ok(Self { window, physical })
    }

    /// Physical base address
    pub const fn physical(&self) -> u64 {
        self.physical
    }
}

impl RegisterBackend for MembusBank {
    fn read(&self, offset: u32) -> Result<u32> {
        let value = self.window.read_u32(offset)?;
        tracing::trace!("CS {:#x} read @ {offset:#x} = {value:#x}", self.physical);
        Ok(value)
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<()> {
        tracing::trace!("CS {:#x} write @ {offset:#x} = {value:#x}", self.physical);
        self.window.write_u32(offset, value)
    }

    fn set_mode(&mut self, _offset: u32, _mode: u32) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> u32 {
        self.window.size()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Membus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires memory-bus board and root; set FPGABUS_MEMBUS_BASE"]
    fn maps_first_chip_select() {
        let base = std::env::var("FPGABUS_MEMBUS_BASE").unwrap();
        let base = u64::from_str_radix(base.trim_start_matches("0x"), 16).unwrap();
        let bank = MembusBank::map(base, fpgabus_chip::bar::MEMBUS_WINDOW_BYTES).unwrap();
        assert_eq!(bank.size(), 4096);
        bank.read(0).unwrap();
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Register backend abstraction
//!
//! Every BAR is served by one backend chosen when the device context is
//! built. The set is closed: simulated registers, PCIe BAR mappings and
//! memory-bus windows.

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::event::EventSink;
use fpgabus_chip::access::AccessMode;
use fpgabus_chip::bar::{membus_address, MEMBUS_WINDOW_BYTES, SIMULATED_BARS};
use std::fmt::Debug;
use std::sync::Arc;

/// Synchronous 32-bit register accessor for one BAR
///
/// Offsets are byte offsets. Callers check bounds and permissions before
/// calling; backends still refuse accesses they cannot perform.
pub trait RegisterBackend: Debug + Send + Sync {
    /// Read a register
    ///
    /// # Errors
    ///
    /// Returns error if the register cannot be read.
    fn read(&self, offset: u32) -> Result<u32>;

    /// Write a register
    ///
    /// # Errors
    ///
    /// Returns error if the register cannot be written.
    fn write(&mut self, offset: u32, value: u32) -> Result<()>;

    /// Change a register's access mode (simulator only; a no-op on hardware)
    ///
    /// # Errors
    ///
    /// Returns error if the offset is invalid for this backend.
    fn set_mode(&mut self, offset: u32, mode: u32) -> Result<()>;

    /// Size of the BAR in bytes
    fn size(&self) -> u32;

    /// Backend type for diagnostics
    fn backend_type(&self) -> BackendType;
}

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-memory register file
    Simulated,
    /// PCIe BAR mapped through sysfs
    Mmio,
    /// Memory-bus chip-select window
    Membus,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulated => write!(f, "Simulated"),
            Self::Mmio => write!(f, "MMIO (PCIe)"),
            Self::Membus => write!(f, "Memory bus"),
        }
    }
}

/// Build the backend for one BAR, or `None` if the BAR is not mapped
///
/// `sink` receives register events from the simulated backend.
///
/// # Errors
///
/// Returns error if a present BAR cannot be mapped.
pub fn select_backend(
    config: &DriverConfig,
    bar: usize,
    sink: &Arc<dyn EventSink>,
) -> Result<Option<Box<dyn RegisterBackend>>> {
    use crate::backends::{MembusBank, MmioBank, SimulatedBank};

    match config.mode {
        AccessMode::Simulator => {
            let Some(layout) = SIMULATED_BARS.get(bar).filter(|b| b.is_present()) else {
                return Ok(None);
            };
            tracing::debug!("BAR{bar}: simulated \"{}\" ({} bytes)", layout.name, layout.size());
            Ok(Some(Box::new(SimulatedBank::new(
                bar,
                layout.registers,
                Arc::clone(sink),
            ))))
        }

        AccessMode::Pcie | AccessMode::Fvd => {
            let address = config
                .pcie_address
                .as_deref()
                .ok_or_else(|| DriverError::invalid_argument("PCIe address not configured"))?;
            match MmioBank::map(address, bar) {
                Ok(bank) => Ok(Some(Box::new(bank))),
                Err(DriverError::DeviceNotFound { path }) => {
                    tracing::debug!("BAR{bar}: {} absent, leaving disabled", path.display());
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }

        AccessMode::MemBus => {
            let base = config
                .membus_base
                .ok_or_else(|| DriverError::invalid_argument("membus base not configured"))?;
            let Some(physical) = membus_address(base, bar) else {
                return Ok(None);
            };
            MembusBank::map(physical, MEMBUS_WINDOW_BYTES)
                .map(|b| Some(Box::new(b) as Box<dyn RegisterBackend>))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SubscriberRegistry;

    fn sink() -> Arc<dyn EventSink> {
        Arc::new(SubscriberRegistry::new())
    }

    #[test]
    fn simulator_maps_dma_and_ctl() {
        let config = DriverConfig::simulator();
        let sink = sink();
        let bar0 = select_backend(&config, 0, &sink).unwrap().unwrap();
        assert_eq!(bar0.backend_type(), BackendType::Simulated);
        assert_eq!(bar0.size(), 2048);
        assert_eq!(select_backend(&config, 1, &sink).unwrap().unwrap().size(), 4096);
        assert!(select_backend(&config, 2, &sink).unwrap().is_none());
    }

    #[test]
    fn pcie_without_address_is_rejected() {
        let mut config = DriverConfig::simulator();
        config.mode = AccessMode::Pcie;
        assert!(select_backend(&config, 0, &sink()).is_err());
    }

    #[test]
    fn missing_pcie_device_leaves_bar_disabled() {
        let config = DriverConfig::pcie("ffff:ff:1f.7", 32);
        assert!(select_backend(&config, 0, &sink()).unwrap().is_none());
    }
}

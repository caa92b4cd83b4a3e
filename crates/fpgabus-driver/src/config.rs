// SPDX-License-Identifier: AGPL-3.0-only

//! Driver configuration
//!
//! Settings decided once when the device context is built. Defaults match
//! the board's stock behaviour; `from_env()` lets deployments and tests
//! override them without recompiling.

use crate::error::{DriverError, Result};
use fpgabus_chip::access::AccessMode;
use fpgabus_chip::event::{DISPATCH_POOL_SIZE, EVENT_BUFFER_SIZE};
use fpgabus_chip::msi::SIMULATOR_IRQ_BASE;
use std::time::Duration;

/// Environment variable selecting the operating mode.
pub const ENV_MODE: &str = "FPGABUS_MODE";
/// Environment variable holding the PCIe address.
pub const ENV_PCIE_ADDR: &str = "FPGABUS_PCIE_ADDR";
/// Environment variable overriding the DMA wait timeout.
pub const ENV_DMA_TIMEOUT_MS: &str = "FPGABUS_DMA_TIMEOUT_MS";
/// Environment variable overriding the subscriber queue depth.
pub const ENV_EVENT_DEPTH: &str = "FPGABUS_EVENT_DEPTH";

/// Device configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Operating mode (selects access matrix, backends and vector table)
    pub mode: AccessMode,

    /// Maximum pending events per subscriber
    pub event_queue_depth: usize,

    /// Slots in the deferred dispatch pool
    pub dispatch_pool_size: usize,

    /// How long a synchronous transfer waits for completion (ms)
    pub dma_timeout_ms: u64,

    /// Host interrupt number of MSI vector 0
    pub irq_base: u32,

    /// PCIe address of the board, e.g. `0000:01:00.0` (PCIe / Fvd modes)
    pub pcie_address: Option<String>,

    /// Physical base address of the FPGA window (memory-bus mode)
    pub membus_base: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::simulator()
    }
}

impl DriverConfig {
    /// Configuration for the software simulator
    pub fn simulator() -> Self {
        Self {
            mode: AccessMode::Simulator,
            event_queue_depth: EVENT_BUFFER_SIZE,
            dispatch_pool_size: DISPATCH_POOL_SIZE,
            dma_timeout_ms: 1000,
            irq_base: SIMULATOR_IRQ_BASE,
            pcie_address: None,
            membus_base: None,
        }
    }

    /// Configuration for a PCIe-attached board
    pub fn pcie(pcie_address: impl Into<String>, irq_base: u32) -> Self {
        Self {
            mode: AccessMode::Pcie,
            irq_base,
            pcie_address: Some(pcie_address.into()),
            ..Self::simulator()
        }
    }

    /// Start from the defaults and apply `FPGABUS_*` environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var(ENV_MODE) {
            config.mode = AccessMode::from_name(&mode).ok_or_else(|| {
                DriverError::invalid_argument(format!("{ENV_MODE}: unknown mode {mode:?}"))
            })?;
        }
        if let Ok(addr) = std::env::var(ENV_PCIE_ADDR) {
            config.pcie_address = Some(addr);
        }
        if let Ok(ms) = std::env::var(ENV_DMA_TIMEOUT_MS) {
            config.dma_timeout_ms = parse_number(ENV_DMA_TIMEOUT_MS, &ms)?;
        }
        if let Ok(depth) = std::env::var(ENV_EVENT_DEPTH) {
            config.event_queue_depth = parse_number(ENV_EVENT_DEPTH, &depth)?;
        }

        tracing::debug!("Driver configuration: {config:?}");
        config.validate()?;
        Ok(config)
    }

    /// Set the DMA wait timeout
    #[must_use]
    pub fn with_dma_timeout_ms(mut self, ms: u64) -> Self {
        self.dma_timeout_ms = ms;
        self
    }

    /// Set the subscriber queue depth
    #[must_use]
    pub fn with_event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth;
        self
    }

    /// Set the deferred dispatch pool size
    #[must_use]
    pub fn with_dispatch_pool_size(mut self, slots: usize) -> Self {
        self.dispatch_pool_size = slots;
        self
    }

    /// DMA wait timeout as a `Duration`
    pub const fn dma_timeout(&self) -> Duration {
        Duration::from_millis(self.dma_timeout_ms)
    }

    /// Reject configurations the device cannot be built from
    ///
    /// # Errors
    ///
    /// Returns error on zero-sized queues/pools or a missing hardware address.
    pub fn validate(&self) -> Result<()> {
        if self.event_queue_depth == 0 {
            return Err(DriverError::invalid_argument("event queue depth must be > 0"));
        }
        if self.dispatch_pool_size == 0 {
            return Err(DriverError::invalid_argument("dispatch pool size must be > 0"));
        }
        match self.mode {
            AccessMode::Pcie | AccessMode::Fvd if self.pcie_address.is_none() => Err(
                DriverError::invalid_argument(format!("{} mode needs a PCIe address", self.mode)),
            ),
            AccessMode::MemBus if self.membus_base.is_none() => Err(
                DriverError::invalid_argument("membus mode needs a physical base address"),
            ),
            _ => Ok(()),
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DriverError::invalid_argument(format!("{name}: not a number: {value:?}")))
}

// SPDX-License-Identifier: AGPL-3.0-only

//! BAR layout.
//!
//! A PCIe function exposes at most six BARs. The board only populates a
//! few of them, and which one carries the DMA controller depends on the
//! board variant.
//!
//! ```text
//! BAR  Simulator          PCIe (default)      Fvd board
//! ──── ────────────────── ─────────────────── ─────────────────────
//!  0   "DMA"  512 regs    DMA + control regs  FVD registers
//!  1   "CTL" 1024 regs    control             DDR memory window
//!  2   -                  control             -
//!  3   -                  control             DMA engine control
//!  4   -                  -                   -
//!  5   -                  -                   -
//! ```

use crate::access::AccessMode;

/// Number of BAR slots on a PCIe function.
pub const BAR_COUNT: usize = 6;

/// Width of one register in bytes.
pub const REGISTER_BYTES: u32 = 4;

/// A BAR emulated by the simulator backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedBar {
    /// Short human-readable name.
    pub name: &'static str,
    /// Number of 32-bit registers backing the BAR (0 = absent).
    pub registers: u32,
}

impl SimulatedBar {
    /// Size of the BAR in bytes.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.registers * REGISTER_BYTES
    }

    /// Whether the simulator maps this BAR at all.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.registers > 0
    }
}

/// BARs emulated in simulator mode.
pub const SIMULATED_BARS: [SimulatedBar; BAR_COUNT] = [
    SimulatedBar { name: "DMA", registers: 512 },
    SimulatedBar { name: "CTL", registers: 1024 },
    SimulatedBar { name: "", registers: 0 },
    SimulatedBar { name: "", registers: 0 },
    SimulatedBar { name: "", registers: 0 },
    SimulatedBar { name: "", registers: 0 },
];

/// BAR that carries the DMA controller for a given mode.
#[must_use]
pub const fn dma_bar(mode: AccessMode) -> usize {
    match mode {
        AccessMode::Fvd => 3,
        AccessMode::Simulator | AccessMode::Pcie | AccessMode::MemBus => 0,
    }
}

/// Chip selects wired to the memory bus (BAR0 and BAR1).
pub const MEMBUS_CHIP_SELECTS: usize = 2;

/// Address stride between memory-bus chip selects.
pub const MEMBUS_CS_STRIDE: u64 = 0x0200_0000;

/// Bytes mapped per memory-bus chip select.
pub const MEMBUS_WINDOW_BYTES: u32 = 4096;

/// Physical address of a memory-bus chip select, or `None` past the last one.
#[must_use]
pub const fn membus_address(base: u64, bar: usize) -> Option<u64> {
    if bar < MEMBUS_CHIP_SELECTS {
        Some(base + bar as u64 * MEMBUS_CS_STRIDE)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_populates_first_two_bars() {
        assert_eq!(SIMULATED_BARS[0].size(), 2048);
        assert_eq!(SIMULATED_BARS[1].size(), 4096);
        assert!(SIMULATED_BARS[2..].iter().all(|b| !b.is_present()));
    }

    #[test]
    fn fvd_moves_dma_to_bar3() {
        assert_eq!(dma_bar(AccessMode::Fvd), 3);
        assert_eq!(dma_bar(AccessMode::Pcie), 0);
    }

    #[test]
    fn membus_chip_selects() {
        assert_eq!(membus_address(0x1000_0000, 1), Some(0x1200_0000));
        assert_eq!(membus_address(0x1000_0000, 2), None);
    }
}

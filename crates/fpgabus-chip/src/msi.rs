// SPDX-License-Identifier: AGPL-3.0-only

//! MSI vector table.
//!
//! All MSI vectors are OR:ed into one host interrupt line; vector `n`
//! arrives as interrupt `base + n`. Vectors 0–7 report DMA completion on
//! channels 0–7, the rest are board interrupt sources. An interrupt
//! source is the bit `1 << vector`.
//!
//! ```text
//! vec  source      name
//!  0   0x00000001  dma0 … vec 7 dma7
//!  8   0x00000100  FPGA error
//! 10   0x00000400  system sync
//! 11   0x00000800  clrx sync
//! 12   0x00001000  VIN0 frame sync
//! 13   0x00002000  VIN1 frame sync
//! 14   0x00004000  IRIG PPS
//! 15   0x00008000  MDST done
//! 16   0x00010000  MDSRX6 done
//! 17   0x00020000  manual IRQ
//! ```

use crate::access::AccessMode;

/// Number of MSI vectors.
pub const MSI_VECTORS: usize = 32;

/// Interrupt line the simulator pretends to own.
pub const SIMULATOR_IRQ_BASE: u32 = 1;

/// What an MSI vector is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vector {
    /// Not connected.
    Disabled,
    /// DMA completion on the given channel.
    DmaDone(usize),
    /// Board interrupt source forwarded as an interrupt event.
    Source(&'static str),
}

impl Vector {
    /// Whether the vector has a handler.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

const fn default_table() -> [Vector; MSI_VECTORS] {
    let mut t = [Vector::Disabled; MSI_VECTORS];
    let mut ch = 0;
    while ch < 8 {
        t[ch] = Vector::DmaDone(ch);
        ch += 1;
    }
    t[8] = Vector::Source("err");
    t[10] = Vector::Source("syssync");
    t[11] = Vector::Source("clrx_sync");
    t[12] = Vector::Source("vin0_sync");
    t[13] = Vector::Source("vin1_sync");
    t[14] = Vector::Source("irig_pps");
    t[15] = Vector::Source("mdst_done");
    t[16] = Vector::Source("mdsrx6_done");
    t[17] = Vector::Source("manual_irq");
    t
}

const fn fvd_table() -> [Vector; MSI_VECTORS] {
    let mut t = [Vector::Disabled; MSI_VECTORS];
    t[0] = Vector::DmaDone(0);
    t[8] = Vector::Source("fvd_interrupt");
    t
}

/// Default vector table (PCIe, memory bus and simulator).
pub const DEFAULT_TABLE: [Vector; MSI_VECTORS] = default_table();

/// Vector table of the Fvd board.
pub const FVD_TABLE: [Vector; MSI_VECTORS] = fvd_table();

/// Vector table for a mode.
#[must_use]
pub const fn table(mode: AccessMode) -> &'static [Vector; MSI_VECTORS] {
    match mode {
        AccessMode::Fvd => &FVD_TABLE,
        AccessMode::Simulator | AccessMode::Pcie | AccessMode::MemBus => &DEFAULT_TABLE,
    }
}

/// Interrupt source bit for a vector.
#[must_use]
pub const fn msi_to_event(vector: u32) -> u32 {
    1 << vector
}

/// Vector of the lowest source bit set, or `None` for an empty source.
#[must_use]
pub const fn event_to_msi(source: u32) -> Option<u32> {
    if source == 0 {
        None
    } else {
        Some(source.trailing_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_vectors_cover_eight_channels() {
        for ch in 0..8 {
            assert_eq!(DEFAULT_TABLE[ch], Vector::DmaDone(ch));
        }
        assert_eq!(DEFAULT_TABLE[9], Vector::Disabled);
    }

    #[test]
    fn source_mapping() {
        assert_eq!(msi_to_event(12), 0x1000);
        assert_eq!(event_to_msi(0x1000), Some(12));
        assert_eq!(event_to_msi(0x1001), Some(0));
        assert_eq!(event_to_msi(0), None);
    }

    #[test]
    fn fvd_has_one_dma_channel() {
        let dma = FVD_TABLE
            .iter()
            .filter(|v| matches!(v, Vector::DmaDone(_)))
            .count();
        assert_eq!(dma, 1);
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! User-space access matrix.
//!
//! Every BAR carries a set of rights per operating mode. The matrix is
//! fixed at boot from the platform identity and never changes afterwards.

use crate::bar::BAR_COUNT;

/// Operating mode of the driver, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Software simulator: every BAR is fully accessible.
    Simulator,
    /// Normal PCIe attachment.
    Pcie,
    /// FPGA attached over the local memory bus.
    MemBus,
    /// PCIe attachment on the Fvd board variant.
    Fvd,
}

impl AccessMode {
    /// Parse a mode name (`sim`, `pcie`, `membus`, `fvd`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sim" | "simulator" => Some(Self::Simulator),
            "pcie" | "pci" => Some(Self::Pcie),
            "membus" | "memory-bus" => Some(Self::MemBus),
            "fvd" => Some(Self::Fvd),
            _ => None,
        }
    }

    /// Whether this is the simulator.
    #[must_use]
    pub const fn is_simulator(self) -> bool {
        matches!(self, Self::Simulator)
    }

    /// Name of the physical interface used in this mode.
    #[must_use]
    pub const fn interface(self) -> &'static str {
        match self {
            Self::MemBus => "memory bus",
            Self::Simulator | Self::Pcie | Self::Fvd => "PCIe",
        }
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulator => write!(f, "simulator"),
            Self::Pcie => write!(f, "pcie"),
            Self::MemBus => write!(f, "membus"),
            Self::Fvd => write!(f, "fvd"),
        }
    }
}

/// Bit set of access rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessRights(u8);

impl AccessRights {
    /// No access.
    pub const NONE: Self = Self(0);
    /// Register read.
    pub const READ: Self = Self(0x1);
    /// Register write.
    pub const WRITE: Self = Self(0x2);
    /// Event subscription / register mode changes.
    pub const EVENT: Self = Self(0x4);
    /// Read, write and event.
    pub const ALL: Self = Self(0x7);
    /// Read and event, no write.
    pub const READ_EVENT: Self = Self(0x5);

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Union of two right sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if every right in `other` is present in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AccessRights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

use AccessRights as R;

/// PCIe: user space must not write BAR0.
pub const PCIE_MATRIX: [AccessRights; BAR_COUNT] =
    [R::READ_EVENT, R::ALL, R::ALL, R::ALL, R::ALL, R::ALL];

/// Fvd board: FVD registers, DDR window and DMA engine control only.
pub const FVD_MATRIX: [AccessRights; BAR_COUNT] =
    [R::ALL, R::ALL, R::NONE, R::ALL, R::NONE, R::NONE];

/// Memory bus: only BAR0 and BAR1 exist for user space.
pub const MEMBUS_MATRIX: [AccessRights; BAR_COUNT] =
    [R::ALL, R::ALL, R::NONE, R::NONE, R::NONE, R::NONE];

/// Simulator: everything is accessible.
pub const SIMULATOR_MATRIX: [AccessRights; BAR_COUNT] = [R::ALL; BAR_COUNT];

/// Access matrix for a mode.
#[must_use]
pub const fn matrix(mode: AccessMode) -> &'static [AccessRights; BAR_COUNT] {
    match mode {
        AccessMode::Simulator => &SIMULATOR_MATRIX,
        AccessMode::Pcie => &PCIE_MATRIX,
        AccessMode::MemBus => &MEMBUS_MATRIX,
        AccessMode::Fvd => &FVD_MATRIX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcie_bar0_is_read_only() {
        let m = matrix(AccessMode::Pcie);
        assert!(m[0].contains(AccessRights::READ));
        assert!(!m[0].contains(AccessRights::WRITE));
        assert!(m[1].contains(AccessRights::READ | AccessRights::WRITE));
    }

    #[test]
    fn membus_hides_upper_bars() {
        let m = matrix(AccessMode::MemBus);
        assert!(m[2..].iter().all(|r| *r == AccessRights::NONE));
    }

    #[test]
    fn mode_names_parse() {
        assert_eq!(AccessMode::from_name("SIM"), Some(AccessMode::Simulator));
        assert_eq!(AccessMode::from_name("membus"), Some(AccessMode::MemBus));
        assert_eq!(AccessMode::from_name("usb"), None);
    }
}

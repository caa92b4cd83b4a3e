// SPDX-License-Identifier: AGPL-3.0-only

//! Access kinds and the per-mode permission policy
//!
//! The policy is fixed when the device context is built; every register
//! operation consults it before touching a backend.

use fpgabus_chip::access::{matrix, AccessMode, AccessRights};
use fpgabus_chip::bar::BAR_COUNT;

/// Kind of register access being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Register read
    Read,
    /// Register write
    Write,
    /// Read-modify-write; needs both read and write
    Modify,
    /// Event subscription (register mode change)
    Event,
}

impl AccessKind {
    /// Matrix bit required for this kind
    pub const fn rights(self) -> AccessRights {
        match self {
            Self::Read => AccessRights::READ,
            Self::Write => AccessRights::WRITE,
            Self::Modify => AccessRights::READ.union(AccessRights::WRITE),
            Self::Event => AccessRights::EVENT,
        }
    }
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Modify => write!(f, "modify"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// Static access matrix selected for one operating mode
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    mode: AccessMode,
    matrix: &'static [AccessRights; BAR_COUNT],
}

impl AccessPolicy {
    /// Policy for a mode
    pub const fn for_mode(mode: AccessMode) -> Self {
        Self {
            mode,
            matrix: matrix(mode),
        }
    }

    /// Operating mode the policy was built for
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Whether `kind` is allowed on `bar`; `false` for bars outside the table
    pub fn permits(&self, bar: usize, kind: AccessKind) -> bool {
        self.matrix
            .get(bar)
            .is_some_and(|rights| rights.contains(kind.rights()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcie_bar0_is_read_only() {
        let p = AccessPolicy::for_mode(AccessMode::Pcie);
        assert!(p.permits(0, AccessKind::Read));
        assert!(p.permits(0, AccessKind::Event));
        assert!(!p.permits(0, AccessKind::Write));
        assert!(p.permits(1, AccessKind::Write));
    }

    #[test]
    fn membus_upper_bars_closed() {
        let p = AccessPolicy::for_mode(AccessMode::MemBus);
        assert!(p.permits(1, AccessKind::Write));
        for bar in 2..BAR_COUNT {
            assert!(!p.permits(bar, AccessKind::Read));
        }
    }

    #[test]
    fn out_of_table_never_permitted() {
        let p = AccessPolicy::for_mode(AccessMode::Simulator);
        assert!(!p.permits(BAR_COUNT, AccessKind::Read));
    }

    #[test]
    fn modify_needs_read_and_write() {
        let rights = AccessKind::Modify.rights();
        assert!(rights.contains(AccessRights::READ));
        assert!(rights.contains(AccessRights::WRITE));

        let p = AccessPolicy::for_mode(AccessMode::Pcie);
        assert!(!p.permits(0, AccessKind::Modify));
        assert!(p.permits(1, AccessKind::Modify));
        let m = AccessPolicy::for_mode(AccessMode::MemBus);
        assert!(!m.permits(2, AccessKind::Modify));
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Register banks and the access guard
//!
//! Every user-visible register operation goes through
//! [`RegisterBanks::check_access`] first. Checks run in a fixed order:
//! BAR index, BAR mapped, permission for the mode, offset in range. A
//! rejected access never reaches the backend.

use crate::access::{AccessKind, AccessPolicy};
use crate::backend::{select_backend, BackendType, RegisterBackend};
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::event::EventSink;
use fpgabus_chip::bar::{BAR_COUNT, REGISTER_BYTES};
use std::sync::Arc;

/// One BAR with its backend and read-modify-write lock
#[derive(Debug)]
pub struct RegisterBank {
    bar: usize,
    size: u32,
    backend: Option<spin::Mutex<Box<dyn RegisterBackend>>>,
}

impl RegisterBank {
    /// Bank served by `backend`, or disabled when `None`
    pub fn new(bar: usize, backend: Option<Box<dyn RegisterBackend>>) -> Self {
        let size = backend.as_ref().map_or(0, |b| b.size());
        Self {
            bar,
            size,
            backend: backend.map(spin::Mutex::new),
        }
    }

    /// Unmapped bank
    pub fn disabled(bar: usize) -> Self {
        Self::new(bar, None)
    }

    /// BAR index
    pub const fn bar(&self) -> usize {
        self.bar
    }

    /// Whether the BAR was mapped
    pub const fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Size in bytes (0 when disabled)
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Backend serving this bank
    pub fn backend_type(&self) -> Option<BackendType> {
        self.backend.as_ref().map(|b| b.lock().backend_type())
    }

    fn locked(&self) -> Result<spin::MutexGuard<'_, Box<dyn RegisterBackend>>> {
        self.backend
            .as_ref()
            .map(|backend| backend.lock())
            .ok_or(DriverError::BarDisabled { bar: self.bar_u32() })
    }

    fn bar_u32(&self) -> u32 {
        u32::try_from(self.bar).unwrap_or(u32::MAX)
    }

    /// Read without permission checks
    ///
    /// # Errors
    ///
    /// Returns `BarDisabled` or the backend's error.
    pub fn read(&self, offset: u32) -> Result<u32> {
        self.locked()?.read(offset)
    }

    /// Write without permission checks
    ///
    /// # Errors
    ///
    /// Returns `BarDisabled` or the backend's error.
    pub fn write(&self, offset: u32, value: u32) -> Result<()> {
        self.locked()?.write(offset, value)
    }

    /// `(old & !clear) | set` under a single lock acquisition; returns the new value
    ///
    /// # Errors
    ///
    /// Returns `BarDisabled` or the backend's error.
    pub fn modify(&self, offset: u32, clear: u32, set: u32) -> Result<u32> {
        let mut backend = self.locked()?;
        let old = backend.read(offset)?;
        let new = (old & !clear) | set;
        backend.write(offset, new)?;
        Ok(new)
    }

    /// Change a register's mode
    ///
    /// # Errors
    ///
    /// Returns `BarDisabled` or the backend's error.
    pub fn set_mode(&self, offset: u32, mode: u32) -> Result<()> {
        self.locked()?.set_mode(offset, mode)
    }

    /// Write several registers in order without releasing the lock
    ///
    /// # Errors
    ///
    /// Stops at and returns the first backend error.
    pub fn write_sequence(&self, writes: &[(u32, u32)]) -> Result<()> {
        let mut backend = self.locked()?;
        for &(offset, value) in writes {
            backend.write(offset, value)?;
        }
        Ok(())
    }
}

/// The device's BAR table plus the access policy for its mode
#[derive(Debug)]
pub struct RegisterBanks {
    policy: AccessPolicy,
    banks: Vec<Arc<RegisterBank>>,
}

impl RegisterBanks {
    /// Table from already-built banks; missing slots are disabled
    pub fn new(policy: AccessPolicy, banks: Vec<RegisterBank>) -> Self {
        let mut banks: Vec<Arc<RegisterBank>> = banks.into_iter().map(Arc::new).collect();
        while banks.len() < BAR_COUNT {
            banks.push(Arc::new(RegisterBank::disabled(banks.len())));
        }
        Self { policy, banks }
    }

    /// Map every BAR for the configured mode
    ///
    /// # Errors
    ///
    /// Returns error if a present BAR cannot be mapped.
    pub fn build(config: &DriverConfig, sink: &Arc<dyn EventSink>) -> Result<Self> {
        let banks = (0..BAR_COUNT)
            .map(|bar| select_backend(config, bar, sink).map(|b| RegisterBank::new(bar, b)))
            .collect::<Result<Vec<_>>>()?;

        for bank in banks.iter().filter(|b| b.is_enabled()) {
            tracing::info!("BAR{}: {} bytes", bank.bar(), bank.size());
        }
        Ok(Self::new(AccessPolicy::for_mode(config.mode), banks))
    }

    /// Access policy in force
    pub const fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Bank by index, regardless of permissions
    pub fn bank(&self, bar: usize) -> Option<&Arc<RegisterBank>> {
        self.banks.get(bar)
    }

    /// Validate `(bar, kind, offset)` and return the bank
    ///
    /// # Errors
    ///
    /// `InvalidBar`, `BarDisabled`, `PermissionDenied` or `OutOfRange`, in
    /// that order of precedence.
    pub fn check_access(&self, bar: u32, kind: AccessKind, offset: u32) -> Result<&RegisterBank> {
        let bank = self
            .banks
            .get(bar as usize)
            .ok_or(DriverError::InvalidBar { bar })?;
        if !bank.is_enabled() {
            return Err(DriverError::BarDisabled { bar });
        }
        if !self.policy.permits(bar as usize, kind) {
            return Err(DriverError::PermissionDenied {
                bar,
                access: kind.to_string(),
                mode: self.policy.mode().to_string(),
            });
        }
        if offset >= bank.size() {
            return Err(DriverError::out_of_range(offset, bank.size()));
        }
        Ok(bank)
    }

    /// Guarded read
    ///
    /// # Errors
    ///
    /// Returns the guard's rejection or the backend's error.
    pub fn read_register(&self, bar: u32, offset: u32) -> Result<u32> {
        self.check_access(bar, AccessKind::Read, offset)?.read(offset)
    }

    /// Guarded write
    ///
    /// # Errors
    ///
    /// Returns the guard's rejection or the backend's error.
    pub fn write_register(&self, bar: u32, offset: u32, value: u32) -> Result<()> {
        self.check_access(bar, AccessKind::Write, offset)?
            .write(offset, value)
    }

    /// Guarded atomic read-modify-write; returns the new value
    ///
    /// # Errors
    ///
    /// Returns the guard's rejection or the backend's error.
    pub fn modify_register(&self, bar: u32, offset: u32, clear: u32, set: u32) -> Result<u32> {
        self.check_access(bar, AccessKind::Modify, offset)?
            .modify(offset, clear, set)
    }

    /// Guarded read of `count` consecutive registers
    ///
    /// # Errors
    ///
    /// Fails on the first rejected or failing register.
    pub fn read_register_range(&self, bar: u32, offset: u32, count: u32) -> Result<Vec<u32>> {
        (0..count)
            .map(|i| {
                let at = i
                    .checked_mul(REGISTER_BYTES)
                    .and_then(|step| offset.checked_add(step))
                    .ok_or_else(|| {
                        let at = u64::from(offset) + u64::from(i) * u64::from(REGISTER_BYTES);
                        DriverError::out_of_range(at, u32::MAX)
                    })?;
                self.read_register(bar, at)
            })
            .collect()
    }

    /// Guarded register mode change (needs event permission)
    ///
    /// # Errors
    ///
    /// Returns the guard's rejection or the backend's error.
    pub fn set_register_mode(&self, bar: u32, offset: u32, mode: u32) -> Result<()> {
        self.check_access(bar, AccessKind::Event, offset)?
            .set_mode(offset, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpgabus_chip::access::AccessMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Plain register file that counts every call it receives
    #[derive(Debug)]
    struct CountingBackend {
        regs: Vec<u32>,
        calls: Arc<AtomicUsize>,
    }

    impl RegisterBackend for CountingBackend {
        fn read(&self, offset: u32) -> Result<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.regs[(offset / 4) as usize])
        }

        fn write(&mut self, offset: u32, value: u32) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.regs[(offset / 4) as usize] = value;
            Ok(())
        }

        fn set_mode(&mut self, _offset: u32, _mode: u32) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn size(&self) -> u32 {
            u32::try_from(self.regs.len() * 4).unwrap()
        }

        fn backend_type(&self) -> BackendType {
            BackendType::Simulated
        }
    }

    fn banks(mode: AccessMode) -> (RegisterBanks, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let bank = |bar| {
            RegisterBank::new(
                bar,
                Some(Box::new(CountingBackend {
                    regs: vec![0; 16],
                    calls: Arc::clone(&calls),
                })),
            )
        };
        let table = RegisterBanks::new(AccessPolicy::for_mode(mode), vec![bank(0), bank(1)]);
        (table, calls)
    }

    #[test]
    fn guard_order() {
        let (b, _) = banks(AccessMode::Pcie);
        assert!(matches!(
            b.check_access(6, AccessKind::Read, 0),
            Err(DriverError::InvalidBar { bar: 6 })
        ));
        assert!(matches!(
            b.check_access(2, AccessKind::Write, 0x1_0000),
            Err(DriverError::BarDisabled { bar: 2 })
        ));
        // Permission is checked before range
        assert!(matches!(
            b.check_access(0, AccessKind::Write, 0x1_0000),
            Err(DriverError::PermissionDenied { bar: 0, .. })
        ));
        assert!(matches!(
            b.check_access(1, AccessKind::Write, 64),
            Err(DriverError::OutOfRange { offset: 64, limit: 64 })
        ));
        assert!(b.check_access(1, AccessKind::Write, 60).is_ok());
    }

    #[test]
    fn rejected_access_never_reaches_backend() {
        let (b, calls) = banks(AccessMode::MemBus);
        for kind in [AccessKind::Read, AccessKind::Write, AccessKind::Event] {
            assert!(b.check_access(3, kind, 0).is_err());
            assert!(b.check_access(0, kind, 0x400).is_err());
        }
        assert!(b.read_register(4, 0).is_err());
        assert!(b.write_register(0, 64, 1).is_err());
        assert!(b.modify_register(5, 0, 0, 1).is_err());
        assert!(b.set_register_mode(1, 1024, 0).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn modify_checks_read_and_write() {
        let (b, calls) = banks(AccessMode::Pcie);
        let err = b.modify_register(0, 8, 0, 1).unwrap_err();
        assert!(matches!(
            &err,
            DriverError::PermissionDenied { bar: 0, access, .. } if access == "modify"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.modify_register(1, 8, 0, 1).unwrap(), 1);
    }

    #[test]
    fn modify_clears_then_sets() {
        let (b, _) = banks(AccessMode::Simulator);
        b.write_register(1, 8, 0xff00_ff00).unwrap();
        assert_eq!(b.modify_register(1, 8, 0xf000_0f00, 0x0000_000f).unwrap(), 0x0f00_f00f);
        assert_eq!(b.read_register(1, 8).unwrap(), 0x0f00_f00f);
    }

    #[test]
    fn range_read_stops_at_end() {
        let (b, _) = banks(AccessMode::Simulator);
        b.write_register(0, 4, 0xa).unwrap();
        b.write_register(0, 8, 0xb).unwrap();
        assert_eq!(b.read_register_range(0, 4, 2).unwrap(), vec![0xa, 0xb]);
        assert!(matches!(
            b.read_register_range(0, 56, 3),
            Err(DriverError::OutOfRange { offset: 64, .. })
        ));
    }

    #[test]
    fn write_sequence_bypasses_policy() {
        let (b, calls) = banks(AccessMode::Pcie);
        assert!(b.write_register(0, 0, 1).is_err());
        b.bank(0).unwrap().write_sequence(&[(0, 1), (4, 2)]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated register bank
//!
//! Each 32-bit register carries a value and a mode. The mode decides
//! whether user space may read or write it and whether such an access
//! produces a register event, which lets tests observe what the driver
//! programs into the hardware.

use crate::backend::{BackendType, RegisterBackend};
use crate::error::{DriverError, Result};
use crate::event::{Event, EventPayload, EventSink, RegisterAccess};
use fpgabus_chip::bar::REGISTER_BYTES;
use fpgabus_chip::regs::mode;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct SimRegister {
    value: u32,
    mode: u32,
}

impl Default for SimRegister {
    fn default() -> Self {
        Self {
            value: 0,
            mode: mode::DEFAULT,
        }
    }
}

/// In-memory BAR
pub struct SimulatedBank {
    bar: u32,
    registers: Vec<SimRegister>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SimulatedBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBank")
            .field("bar", &self.bar)
            .field("registers", &self.registers.len())
            .finish_non_exhaustive()
    }
}

impl SimulatedBank {
    /// Bank of `registers` zeroed registers, all readable and writable
    pub fn new(bar: usize, registers: u32, sink: Arc<dyn EventSink>) -> Self {
        Self {
            bar: u32::try_from(bar).unwrap_or(u32::MAX),
            registers: vec![SimRegister::default(); registers as usize],
            sink,
        }
    }

    /// Current mode bits of a register
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` past the end of the bank.
    pub fn mode(&self, offset: u32) -> Result<u32> {
        self.register(offset).map(|r| r.mode)
    }

    fn index(&self, offset: u32) -> Result<usize> {
        let index = (offset / REGISTER_BYTES) as usize;
        if index < self.registers.len() {
            Ok(index)
        } else {
            Err(DriverError::out_of_range(offset, self.size()))
        }
    }

    fn register(&self, offset: u32) -> Result<&SimRegister> {
        let index = self.index(offset)?;
        Ok(&self.registers[index])
    }

    fn access(&self, offset: u32, value: u32) -> RegisterAccess {
        RegisterAccess {
            bar: self.bar,
            offset,
            value,
        }
    }
}

impl RegisterBackend for SimulatedBank {
    fn read(&self, offset: u32) -> Result<u32> {
        let reg = *self.register(offset)?;
        if reg.mode & mode::READABLE == 0 {
            tracing::debug!("BAR{} @ {offset:#x}: register is not readable", self.bar);
            return Err(DriverError::backend(format!(
                "BAR{} @ {offset:#x} is not readable",
                self.bar
            )));
        }
        tracing::trace!("BAR{} read @ {offset:#x} = {:#x}", self.bar, reg.value);
        if reg.mode & mode::READ_EVENT != 0 {
            self.sink
                .emit(Event::new(EventPayload::RegisterRead(self.access(offset, reg.value))));
        }
        Ok(reg.value)
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<()> {
        let index = self.index(offset)?;
        let reg = &mut self.registers[index];
        if reg.mode & mode::WRITABLE == 0 {
            tracing::debug!("BAR{} @ {offset:#x}: register is not writable", self.bar);
            return Err(DriverError::backend(format!(
                "BAR{} @ {offset:#x} is not writable",
                self.bar
            )));
        }
        reg.value = value;
        let notify = reg.mode & mode::WRITE_EVENT != 0;
        tracing::trace!("BAR{} write @ {offset:#x} = {value:#x}", self.bar);
        if notify {
            self.sink
                .emit(Event::new(EventPayload::RegisterWrite(self.access(offset, value))));
        }
        Ok(())
    }

    fn set_mode(&mut self, offset: u32, mode: u32) -> Result<()> {
        let index = self.index(offset)?;
        self.registers[index].mode = mode;
        tracing::trace!("BAR{} mode @ {offset:#x} = {mode:#x}", self.bar);
        Ok(())
    }

    fn size(&self) -> u32 {
        u32::try_from(self.registers.len())
            .unwrap_or(u32::MAX)
            .saturating_mul(REGISTER_BYTES)
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Simulated
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Driver core for the fpgabus acquisition board.
//!
//! Exposes the board's register banks, its DMA channels and its interrupt
//! sources to user sessions. Runs against real hardware (PCIe BARs or a
//! memory-bus window) or against a built-in simulator.
//!
//! # Layers
//!
//! ```text
//! Session ──► RegisterBanks::check_access ──► RegisterBank (lock) ──► RegisterBackend
//!    │
//!    ├──────► DmaController (idle bitmap, channel slots, pending FIFO) ──► TransferEngine
//!    │                ▲
//!    │      handle_interrupt(irq) ── InterruptRouter ── MSI vector table
//!    │                │
//!    │                ▼
//!    └◄── Subscriber ◄── SubscriberRegistry ◄── Dispatcher (worker thread)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use fpgabus_driver::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let device = FpgaDevice::simulator()?;
//! let session = device.open();
//! session.set_event_mask(event_type::TYPE_DMA_DONE);
//!
//! let ticket = session.submit_transfer(Direction::Down, 0x1000_0000, 0, 4096)?;
//! session.simulate_irq(1)?; // channel 0 completion
//! device.flush_events();
//!
//! let event = session.dequeue_event().expect("dma-done");
//! assert_eq!(event.ticket(), Some(ticket));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod access;
mod backend;
pub mod backends;
mod bank;
mod config;
mod device;
pub mod dma;
mod error;
pub mod event;
mod irq;
mod sim_memory;
mod stats;

/// Event type bits for subscriber enable masks (re-exported from fpgabus-chip).
pub mod event_type {
    pub use fpgabus_chip::event::{
        TYPE_ALL, TYPE_DMA_DONE, TYPE_IRQ, TYPE_READ_REGB, TYPE_WRITE_REGB,
    };
}

/// Register mode flags for simulated registers (re-exported from fpgabus-chip).
pub mod register_mode {
    pub use fpgabus_chip::regs::mode::{DEFAULT, READABLE, READ_EVENT, WRITABLE, WRITE_EVENT};
}

pub use access::{AccessKind, AccessPolicy};
pub use backend::{select_backend, BackendType, RegisterBackend};
pub use bank::{RegisterBank, RegisterBanks};
pub use config::DriverConfig;
pub use device::{DeviceInfo, FpgaDevice, Session};
pub use dma::{
    CompletionHandle, Cookie, Direction, DmaController, DmaStatus, Request, Retired, Ticket,
    TransferDescriptor, TransferEngine,
};
pub use error::{DriverError, Result};
pub use event::{Event, EventKind, EventPayload, RegisterAccess};
pub use fpgabus_chip::access::AccessMode;
pub use irq::{InterruptRouter, IrqOutcome, Route};
pub use sim_memory::SimulatorMemory;
pub use stats::{DirectionStats, Stats, StatsSnapshot};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        event_type, register_mode, AccessMode, Cookie, Direction, DriverConfig, DriverError,
        Event, EventKind, EventPayload, FpgaDevice, IrqOutcome, Result, Session, Ticket,
    };
}

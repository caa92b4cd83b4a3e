// SPDX-License-Identifier: AGPL-3.0-only

//! DMA scheduling
//!
//! - [`request`]: tickets, cookies, descriptors and completion handles
//! - [`DmaController`]: channel table, idle bitmap and pending FIFO
//! - [`TransferEngine`]: what actually starts a transfer on a channel

mod controller;
mod engine;
mod request;

pub use controller::{DmaController, DmaStatus, Retired};
pub use engine::{BankTransferEngine, TransferEngine};
pub use request::{
    new_ticket, CompletionHandle, Cookie, Direction, Request, Ticket, TransferDescriptor,
};

use controller::capacity_mask;
use crate::bank::RegisterBank;
use crate::error::Result;
use fpgabus_chip::access::AccessMode;
use fpgabus_chip::regs::{dma as regs, SIMULATOR_DMA_CHANNELS};

/// Channel count and idle bitmap for a mode
///
/// The simulator always has one idle channel. Hardware reports its channel
/// count in CAPABILITY and busy channels in STATUS.
///
/// # Errors
///
/// Returns error if the DMA bank cannot be read.
pub fn probe_channels(mode: AccessMode, bank: &RegisterBank) -> Result<(usize, u32)> {
    if mode.is_simulator() {
        return Ok((SIMULATOR_DMA_CHANNELS, 0b1));
    }
    let capability = bank.read(regs::CAPABILITY)?;
    let status = bank.read(regs::STATUS)?;
    let channels = (capability & regs::CAPABILITY_CHANNELS_MASK) as usize;
    let idle = !status & capacity_mask(channels);
    tracing::info!("DMA: {channels} channels, capability {capability:#x}, status {status:#x}");
    Ok((channels, idle))
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Event type bits.
//!
//! A subscriber's enable mask is a bitwise OR of these values.

/// Interrupt forwarded from the board.
pub const TYPE_IRQ: u32 = 1 << 0;
/// Simulated register was written.
pub const TYPE_WRITE_REGB: u32 = 1 << 1;
/// Simulated register was read.
pub const TYPE_READ_REGB: u32 = 1 << 2;
/// DMA transfer completed.
pub const TYPE_DMA_DONE: u32 = 1 << 3;

/// Every event type.
pub const TYPE_ALL: u32 = TYPE_IRQ | TYPE_WRITE_REGB | TYPE_READ_REGB | TYPE_DMA_DONE;

/// Pending events a subscriber may hold before new ones are dropped.
pub const EVENT_BUFFER_SIZE: usize = 20;

/// Slots in the deferred dispatch pool.
pub const DISPATCH_POOL_SIZE: usize = 20;

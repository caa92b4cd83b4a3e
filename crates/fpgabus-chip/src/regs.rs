// SPDX-License-Identifier: AGPL-3.0-only

//! DMA controller register map.
//!
//! The controller exposes one shared register window. Per-channel
//! descriptor registers (SRC, DEST, LEN, DIR, START) are banked: the
//! value written to [`dma::CHAN`] selects which channel's set is visible,
//! so it must be written first.
//!
//! ```text
//! 0x100  UNIT_ID      0x110  STATUS   (busy bit per channel)
//! 0x104  FW_VER_NUM   0x114  ABORT
//! 0x108  HEADER_CONF  0x118  SRC_ADDR
//! 0x10C  CAPABILITY   0x11C  DEST_ADDR
//!                     0x120  LEN_BYTES (multiple of 32)
//!                     0x124  DIR_UP_STRM
//!                     0x128  START
//!                     0x12C  CHAN
//! ```

/// DMA controller registers, offsets within the DMA BAR.
pub mod dma {
    /// Base of the DMA register block.
    pub const REG_BASE: u32 = 0x100;

    /// Unit identification.
    pub const UNIT_ID: u32 = REG_BASE;
    /// Firmware version number.
    pub const FW_VER_NUM: u32 = REG_BASE + 0x04;
    /// Header configuration.
    pub const HEADER_CONF: u32 = REG_BASE + 0x08;
    /// Capability word; the low nibble holds the channel count.
    pub const CAPABILITY: u32 = REG_BASE + 0x0C;
    /// Status word; bit `n` set means channel `n` is busy.
    pub const STATUS: u32 = REG_BASE + 0x10;
    /// Abort.
    pub const ABORT: u32 = REG_BASE + 0x14;
    /// Source address of the selected channel.
    pub const SRC_ADDR: u32 = REG_BASE + 0x18;
    /// Destination address of the selected channel.
    pub const DEST_ADDR: u32 = REG_BASE + 0x1C;
    /// Transfer length in bytes of the selected channel.
    pub const LEN_BYTES: u32 = REG_BASE + 0x20;
    /// Direction of the selected channel.
    pub const DIR_UP_STRM: u32 = REG_BASE + 0x24;
    /// Write 1 to start the selected channel.
    pub const START: u32 = REG_BASE + 0x28;
    /// Channel select.
    pub const CHAN: u32 = REG_BASE + 0x2C;

    /// Mask applied to [`CAPABILITY`] to obtain the channel count.
    pub const CAPABILITY_CHANNELS_MASK: u32 = 0xF;

    /// Required alignment of a transfer length.
    pub const LEN_ALIGN: u32 = 32;

    /// [`DIR_UP_STRM`] values.
    pub mod dir {
        /// Down-stream: system RAM to FPGA RAM.
        pub const DOWN: u32 = 0x0;
        /// Up-stream: FPGA RAM to system RAM.
        pub const UP: u32 = 0x1;
    }
}

/// Upper bound on DMA channels the scheduler tracks (one bit each).
pub const MAX_DMA_CHANNELS: usize = 32;

/// Channel count of the simulated DMA controller.
pub const SIMULATOR_DMA_CHANNELS: usize = 1;

/// Mode flags of a simulated register.
///
/// By default every simulated register is readable and writable and
/// produces no events.
pub mod mode {
    /// Register is readable.
    pub const READABLE: u32 = 1 << 0;
    /// Register is writable.
    pub const WRITABLE: u32 = 1 << 1;
    /// Emit a register-write event on write.
    pub const WRITE_EVENT: u32 = 1 << 2;
    /// Emit a register-read event on read.
    pub const READ_EVENT: u32 = 1 << 3;
    /// Default mode of a freshly created register.
    pub const DEFAULT: u32 = READABLE | WRITABLE;
}

/// Driver version reported by the device info query.
pub mod version {
    /// Major.
    pub const MAJOR: u8 = 0;
    /// Minor.
    pub const MINOR: u8 = 1;
    /// Revision.
    pub const REVISION: u8 = 0;
}

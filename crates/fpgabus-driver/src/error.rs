// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for fpgabus driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur during driver operations
///
/// No variant is fatal: each is a specific rejection the caller can act on.
#[derive(Debug, Error)]
pub enum DriverError {
    /// BAR index outside the BAR table
    #[error("Invalid BAR{bar}")]
    InvalidBar {
        /// Requested BAR index
        bar: u32,
    },

    /// BAR exists but was never mapped
    #[error("BAR{bar} is not mapped")]
    BarDisabled {
        /// BAR index
        bar: u32,
    },

    /// Requested access kind is not in the access matrix for this BAR
    #[error("BAR{bar} does not permit {access} access in {mode} mode")]
    PermissionDenied {
        /// BAR index
        bar: u32,
        /// Requested access, human readable
        access: String,
        /// Operating mode
        mode: String,
    },

    /// Offset beyond the end of the BAR or simulator window
    #[error("Offset {offset:#x} out of range (limit {limit:#x})")]
    OutOfRange {
        /// Requested offset
        offset: u64,
        /// First invalid offset
        limit: u64,
    },

    /// Completion interrupt that matches no in-flight transfer
    #[error("Spurious DMA interrupt {irq}{}", .channel.map(|c| format!(" on channel {c}")).unwrap_or_default())]
    SpuriousInterrupt {
        /// Interrupt identifier
        irq: u32,
        /// Channel the interrupt mapped to, if any
        channel: Option<usize>,
    },

    /// A pool or allocator is exhausted; retrying later may succeed
    #[error("Allocation failed: {what}")]
    AllocationFailure {
        /// What could not be allocated
        what: String,
    },

    /// Caller stopped waiting; the underlying operation's fate is unknown
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Subscriber queue is full; the event was dropped
    #[error("Event queue full ({depth} pending), event dropped")]
    QueueOverflow {
        /// Queue depth at the time of the drop
        depth: usize,
    },

    /// Operation only exists in simulator mode
    #[error("{operation} is only available in simulator mode")]
    NotSimulator {
        /// Rejected operation
        operation: &'static str,
    },

    /// Resource belongs to another session
    #[error("{what} belongs to another session")]
    NotOwner {
        /// Resource in question
        what: &'static str,
    },

    /// Malformed request from a caller
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for rejection
        reason: String,
    },

    /// Register backend refused or failed an access
    #[error("Backend error: {reason}")]
    Backend {
        /// Reason for failure
        reason: String,
    },

    /// Device resource not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error while mapping device memory
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl DriverError {
    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a backend error
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    /// Create an allocation failure
    pub fn allocation_failure(what: impl Into<String>) -> Self {
        Self::AllocationFailure { what: what.into() }
    }

    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create an out of range error
    pub fn out_of_range(offset: impl Into<u64>, limit: impl Into<u64>) -> Self {
        Self::OutOfRange {
            offset: offset.into(),
            limit: limit.into(),
        }
    }

    /// Negative errno the character-device layer reports for this error
    pub fn errno(&self) -> i32 {
        const EINVAL: i32 = 22;
        const EFAULT: i32 = 14;
        const EACCES: i32 = 13;
        const ENOMEM: i32 = 12;
        const ETIMEDOUT: i32 = 110;
        const ENOSPC: i32 = 28;
        const EIO: i32 = 5;
        const ENODEV: i32 = 19;

        let errno = match self {
            Self::InvalidBar { .. }
            | Self::SpuriousInterrupt { .. }
            | Self::NotSimulator { .. }
            | Self::NotOwner { .. }
            | Self::InvalidArgument { .. } => EINVAL,
            Self::BarDisabled { .. } | Self::OutOfRange { .. } => EFAULT,
            Self::PermissionDenied { .. } | Self::Backend { .. } => EACCES,
            Self::AllocationFailure { .. } => ENOMEM,
            Self::Timeout { .. } => ETIMEDOUT,
            Self::QueueOverflow { .. } => ENOSPC,
            Self::DeviceNotFound { .. } => ENODEV,
            Self::Io { .. } => EIO,
        };
        -errno
    }
}

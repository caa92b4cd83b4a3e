// SPDX-License-Identifier: AGPL-3.0-only

//! Simulator RAM window
//!
//! Stands in for the board's memory in simulator mode. One session owns
//! the window; simulated transfers copy between a caller buffer and the
//! window at an offset.

use crate::dma::{Cookie, Direction};
use crate::error::{DriverError, Result};
use bytes::BytesMut;

#[derive(Debug)]
struct Window {
    owner: Cookie,
    data: BytesMut,
}

/// The device's single simulator memory window
#[derive(Debug, Default)]
pub struct SimulatorMemory {
    window: spin::Mutex<Option<Window>>,
}

impl SimulatorMemory {
    /// No window registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a zeroed window of `size` bytes owned by `owner`
    ///
    /// Replaces any previous window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero size.
    pub fn setup(&self, owner: Cookie, size: usize) -> Result<()> {
        if size == 0 {
            return Err(DriverError::invalid_argument("simulator memory size must be > 0"));
        }
        let previous = self.window.lock().replace(Window {
            owner,
            data: BytesMut::zeroed(size),
        });
        if let Some(previous) = previous {
            tracing::debug!("Simulator memory of {} replaced", previous.owner);
        }
        tracing::info!("Simulator memory: {size} bytes owned by {owner}");
        Ok(())
    }

    /// Size of the window, if one is registered
    pub fn size(&self) -> Option<usize> {
        self.window.lock().as_ref().map(|w| w.data.len())
    }

    /// Copy between `buffer` and the window at `offset`
    ///
    /// `Down` copies `buffer` into the window (system → device), `Up` fills
    /// `buffer` from the window.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` without a window, `NotOwner` for another session,
    /// `OutOfRange` if the copy leaves the window.
    pub fn transfer(
        &self,
        caller: Cookie,
        direction: Direction,
        offset: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        let mut guard = self.window.lock();
        let window = guard
            .as_mut()
            .ok_or_else(|| DriverError::invalid_argument("no simulator memory registered"))?;
        if window.owner != caller {
            return Err(DriverError::NotOwner {
                what: "simulator memory",
            });
        }
        let end = offset
            .checked_add(buffer.len())
            .filter(|&end| end <= window.data.len())
            .ok_or_else(|| {
                DriverError::out_of_range(
                    (offset as u64).saturating_add(buffer.len() as u64),
                    window.data.len() as u64,
                )
            })?;
        match direction {
            Direction::Down => window.data[offset..end].copy_from_slice(buffer),
            Direction::Up => buffer.copy_from_slice(&window.data[offset..end]),
        }
        Ok(())
    }

    /// Drop the window if `owner` holds it; returns whether it did
    pub fn release(&self, owner: Cookie) -> bool {
        let mut guard = self.window.lock();
        if guard.as_ref().is_some_and(|w| w.owner == owner) {
            *guard = None;
            drop(guard);
            tracing::debug!("Simulator memory released by {owner}");
            true
        } else {
            false
        }
    }
}

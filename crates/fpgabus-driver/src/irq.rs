// SPDX-License-Identifier: AGPL-3.0-only

//! Interrupt routing
//!
//! Host interrupt numbers are `irq_base + vector`. The vector table of the
//! board variant decides whether a vector reports DMA completion or is an
//! interrupt source forwarded to subscribers.

use crate::dma::Retired;
use crate::error::{DriverError, Result};
use fpgabus_chip::access::AccessMode;
use fpgabus_chip::msi::{self, Vector, MSI_VECTORS};

/// What an interrupt number resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// DMA completion for a channel
    Dma {
        /// Channel named by the vector table
        channel: usize,
    },
    /// Forwarded interrupt source
    Source {
        /// MSI vector
        vector: u32,
        /// Source name
        name: &'static str,
    },
}

/// Result of handling one interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqOutcome {
    /// A transfer retired and its dma-done event was dispatched
    DmaDone(Retired),
    /// DMA vector with nothing in flight; ignored
    Spurious,
    /// Interrupt event dispatched with this source mask
    Forwarded {
        /// `1 << vector`
        source: u32,
    },
}

/// Vector table plus the interrupt number of vector 0
#[derive(Debug, Clone, Copy)]
pub struct InterruptRouter {
    table: &'static [Vector; MSI_VECTORS],
    irq_base: u32,
}

impl InterruptRouter {
    /// Router for a board variant
    pub const fn new(mode: AccessMode, irq_base: u32) -> Self {
        Self {
            table: msi::table(mode),
            irq_base,
        }
    }

    /// Interrupt number of vector 0
    pub const fn irq_base(&self) -> u32 {
        self.irq_base
    }

    /// Resolve a host interrupt number
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for numbers outside the vector range or
    /// vectors with no handler.
    pub fn route(&self, irq: u32) -> Result<Route> {
        let vector = irq
            .checked_sub(self.irq_base)
            .filter(|&v| (v as usize) < MSI_VECTORS)
            .ok_or_else(|| DriverError::invalid_argument(format!("irq {irq} is not an MSI vector")))?;
        match self.table[vector as usize] {
            Vector::DmaDone(channel) => Ok(Route::Dma { channel }),
            Vector::Source(name) => Ok(Route::Source { vector, name }),
            Vector::Disabled => Err(DriverError::invalid_argument(format!(
                "MSI vector {vector} is disabled"
            ))),
        }
    }

    /// Interrupt number for the lowest source bit in `source`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty source mask.
    pub fn irq_for_source(&self, source: u32) -> Result<u32> {
        let vector = msi::event_to_msi(source)
            .ok_or_else(|| DriverError::invalid_argument("empty interrupt source"))?;
        self.irq_base
            .checked_add(vector)
            .ok_or_else(|| DriverError::invalid_argument("irq number overflow"))
    }

    /// Enabled vectors with their routes
    pub fn enabled(&self) -> impl Iterator<Item = (u32, Vector)> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_enabled())
            .map(|(i, v)| (u32::try_from(i).unwrap_or(u32::MAX), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_routes() {
        let r = InterruptRouter::new(AccessMode::Pcie, 32);
        assert_eq!(r.route(32).unwrap(), Route::Dma { channel: 0 });
        assert_eq!(r.route(39).unwrap(), Route::Dma { channel: 7 });
        assert_eq!(
            r.route(49).unwrap(),
            Route::Source {
                vector: 17,
                name: "manual_irq"
            }
        );
        assert!(r.route(41).is_err()); // vector 9 unused
        assert!(r.route(31).is_err());
        assert!(r.route(32 + 32).is_err());
    }

    #[test]
    fn fvd_table_is_sparse() {
        let r = InterruptRouter::new(AccessMode::Fvd, 0);
        let enabled: Vec<u32> = r.enabled().map(|(v, _)| v).collect();
        assert_eq!(enabled, [0, 8]);
        assert!(r.route(1).is_err());
    }

    #[test]
    fn source_uses_lowest_bit() {
        let r = InterruptRouter::new(AccessMode::Simulator, 1);
        assert_eq!(r.irq_for_source(1).unwrap(), 1);
        assert_eq!(r.irq_for_source((1 << 17) | (1 << 20)).unwrap(), 18);
        assert!(r.irq_for_source(0).is_err());
    }
}

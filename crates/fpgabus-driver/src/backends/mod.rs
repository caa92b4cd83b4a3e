// SPDX-License-Identifier: AGPL-3.0-only

//! Register backend implementations

mod membus;
mod mmap;
mod mmio;
mod simulated;

pub use membus::MembusBank;
pub use mmap::MappedWindow;
pub use mmio::MmioBank;
pub use simulated::SimulatedBank;

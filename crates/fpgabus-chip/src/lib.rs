// SPDX-License-Identifier: AGPL-3.0-only

//! Register-level model of the FPGA acquisition board.
//!
//! This crate has **no dependencies** and **no hardware access**. It is the
//! static description of the board as seen by the driver: how many BARs
//! exist and which of them user space may touch, where the DMA controller's
//! registers live, and how MSI vectors map to interrupt sources.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`bar`] | BAR count, simulated BAR sizes, DMA bank selection per board |
//! | [`access`] | Per-mode user-space access matrix (read / write / event) |
//! | [`regs`] | DMA controller register map and simulated register mode flags |
//! | [`msi`] | MSI vector table and vector ↔ interrupt-source mapping |
//! | [`event`] | Event type bits and subscriber queue depth |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod bar;
pub mod event;
pub mod msi;
pub mod regs;

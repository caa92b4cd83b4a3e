// SPDX-License-Identifier: AGPL-3.0-only

//! Event notification
//!
//! Events are immutable values. A producer hands one event to the
//! [`SubscriberRegistry`], which clones it into the queue of every
//! subscriber whose filters match. Producers that must not do that work
//! inline go through the [`Dispatcher`] instead.
//!
//! ```text
//! interrupt path ──► Dispatcher ──(worker)──┐
//!                                           ▼
//! simulated bank ─────────────────► SubscriberRegistry::publish
//!                                           │ clone per match
//!                              ┌────────────┼────────────┐
//!                              ▼            ▼            ▼
//!                          Subscriber   Subscriber   Subscriber
//!                          (≤ depth)    (≤ depth)    (≤ depth)
//! ```

mod dispatch;
mod registry;
mod subscriber;

pub use dispatch::Dispatcher;
pub use registry::{PublishReport, SubscriberRegistry};
pub use subscriber::Subscriber;

use crate::dma::{Cookie, Ticket};
use fpgabus_chip::event::{TYPE_DMA_DONE, TYPE_IRQ, TYPE_READ_REGB, TYPE_WRITE_REGB};
use std::time::{Duration, SystemTime};

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Hardware interrupt forwarded from an MSI vector
    Interrupt,
    /// A watched register was written
    RegisterWrite,
    /// A watched register was read
    RegisterRead,
    /// A DMA transfer completed
    DmaDone,
}

impl EventKind {
    /// Bit in a subscriber's enable mask
    pub const fn bit(self) -> u32 {
        match self {
            Self::Interrupt => TYPE_IRQ,
            Self::RegisterWrite => TYPE_WRITE_REGB,
            Self::RegisterRead => TYPE_READ_REGB,
            Self::DmaDone => TYPE_DMA_DONE,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "irq"),
            Self::RegisterWrite => write!(f, "write-regb"),
            Self::RegisterRead => write!(f, "read-regb"),
            Self::DmaDone => write!(f, "dma-done"),
        }
    }
}

/// Register location and value carried by register events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAccess {
    /// BAR index
    pub bar: u32,
    /// Byte offset within the BAR
    pub offset: u32,
    /// Value read or written
    pub value: u32,
}

/// Event payload; the variant determines the event kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Interrupt source mask (`1 << vector`)
    Interrupt {
        /// Source bit(s)
        source: u32,
    },
    /// Register written
    RegisterWrite(RegisterAccess),
    /// Register read
    RegisterRead(RegisterAccess),
    /// DMA transfer retired
    DmaDone {
        /// Ticket returned at submission
        ticket: Ticket,
        /// Time between hardware start and completion
        elapsed: Duration,
        /// Owner of the transfer
        cookie: Cookie,
    },
}

impl EventPayload {
    /// Kind tag of this payload
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Interrupt { .. } => EventKind::Interrupt,
            Self::RegisterWrite(_) => EventKind::RegisterWrite,
            Self::RegisterRead(_) => EventKind::RegisterRead,
            Self::DmaDone { .. } => EventKind::DmaDone,
        }
    }
}

/// A notification delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    payload: EventPayload,
    produced: Option<SystemTime>,
    delivered: Option<SystemTime>,
}

impl Event {
    /// New event; timestamps are filled in by publish and dequeue
    pub const fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            produced: None,
            delivered: None,
        }
    }

    /// Interrupt event for a source mask
    pub const fn interrupt(source: u32) -> Self {
        Self::new(EventPayload::Interrupt { source })
    }

    /// DMA completion event
    pub const fn dma_done(ticket: Ticket, elapsed: Duration, cookie: Cookie) -> Self {
        Self::new(EventPayload::DmaDone {
            ticket,
            elapsed,
            cookie,
        })
    }

    /// Event kind
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Event payload
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// When the event was published
    pub const fn produced(&self) -> Option<SystemTime> {
        self.produced
    }

    /// When the event was handed to its subscriber
    pub const fn delivered(&self) -> Option<SystemTime> {
        self.delivered
    }

    /// Ticket of a dma-done event
    pub const fn ticket(&self) -> Option<Ticket> {
        match self.payload {
            EventPayload::DmaDone { ticket, .. } => Some(ticket),
            _ => None,
        }
    }

    /// Cookie of a dma-done event
    pub const fn cookie(&self) -> Option<Cookie> {
        match self.payload {
            EventPayload::DmaDone { cookie, .. } => Some(cookie),
            _ => None,
        }
    }

    pub(crate) fn stamp_produced(&mut self, at: SystemTime) {
        self.produced = Some(at);
    }

    pub(crate) fn stamp_delivered(&mut self, at: SystemTime) {
        self.delivered = Some(at);
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            EventPayload::Interrupt { source } => write!(f, "irq source={source:#010x}"),
            EventPayload::RegisterWrite(a) => write!(
                f,
                "write-regb BAR{} @ {:#06x} = {:#010x}",
                a.bar, a.offset, a.value
            ),
            EventPayload::RegisterRead(a) => write!(
                f,
                "read-regb BAR{} @ {:#06x} = {:#010x}",
                a.bar, a.offset, a.value
            ),
            EventPayload::DmaDone {
                ticket,
                elapsed,
                cookie,
            } => write!(
                f,
                "dma-done ticket={ticket} cookie={cookie} time={}us",
                elapsed.as_micros()
            ),
        }
    }
}

/// Anything that accepts produced events
///
/// Implemented by the registry (inline fan-out) and the dispatcher
/// (deferred fan-out). Register backends emit through this seam.
pub trait EventSink: Send + Sync {
    /// Hand an event over for delivery
    fn emit(&self, event: Event);
}

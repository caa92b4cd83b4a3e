// SPDX-License-Identifier: AGPL-3.0-only

//! Transfer requests, tickets and completion handles

use crate::error::{DriverError, Result};
use fpgabus_chip::regs::dma::dir;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Tickets stay in the non-negative range of an `i32`
const TICKET_MASK: u32 = 0x7fff_ffff;

static NEXT_TICKET: AtomicU32 = AtomicU32::new(0);

/// Identifier assigned to a request at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u32);

impl Ticket {
    /// Wrap a raw value (masked to 31 bits)
    pub const fn from_raw(value: u32) -> Self {
        Self(value & TICKET_MASK)
    }

    /// Raw ticket value
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Next process-wide ticket
///
/// Strictly increasing until the 31-bit range wraps.
pub fn new_ticket() -> Ticket {
    Ticket::from_raw(NEXT_TICKET.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
}

/// Opaque owner identity attached to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cookie(u64);

impl Cookie {
    /// Cookie from a raw value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw cookie value
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// System memory to device (host → FPGA)
    Down,
    /// Device to system memory (FPGA → host)
    Up,
}

impl Direction {
    /// Value for the DIR_UP_STRM register
    pub const fn register_value(self) -> u32 {
        match self {
            Self::Down => dir::DOWN,
            Self::Up => dir::UP,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Down => write!(f, "down"),
            Self::Up => write!(f, "up"),
        }
    }
}

/// Addresses and length programmed into a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferDescriptor {
    /// Source bus address
    pub src: u32,
    /// Destination bus address
    pub dst: u32,
    /// Length in bytes
    pub len: u32,
    /// Direction
    pub direction: Direction,
}

impl TransferDescriptor {
    /// Descriptor between a system address and a device address
    pub const fn between(direction: Direction, system: u32, device: u32, len: u32) -> Self {
        let (src, dst) = match direction {
            Direction::Down => (system, device),
            Direction::Up => (device, system),
        };
        Self {
            src,
            dst,
            len,
            direction,
        }
    }
}

#[derive(Debug, Default)]
struct CompletionState {
    elapsed: Option<Duration>,
}

#[derive(Debug, Default)]
struct Completion {
    state: Mutex<CompletionState>,
    done: Condvar,
}

impl Completion {
    fn signal(&self, elapsed: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.elapsed = Some(elapsed);
        self.done.notify_all();
    }
}

/// Waitable handle for one submitted request
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    ticket: Ticket,
    inner: Arc<Completion>,
}

impl CompletionHandle {
    /// Ticket of the awaited request
    pub const fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Elapsed transfer time if the request has retired
    pub fn try_result(&self) -> Option<Duration> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed
    }

    /// Whether the request has retired
    pub fn is_complete(&self) -> bool {
        self.try_result().is_some()
    }

    /// Block until the request retires
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if `timeout` elapses first. The hardware transfer
    /// is not stopped; its outcome is unknown to the caller.
    pub fn wait(&self, timeout: Duration) -> Result<Duration> {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .inner
            .done
            .wait_timeout_while(state, timeout, |s| s.elapsed.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        match state.elapsed {
            Some(elapsed) => Ok(elapsed),
            None => {
                tracing::warn!("Ticket {} not done after {timeout:?}", self.ticket);
                Err(DriverError::Timeout {
                    duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

/// A transfer descriptor owned by the scheduler from submission to retirement
#[derive(Debug)]
pub struct Request {
    descriptor: TransferDescriptor,
    ticket: Ticket,
    cookie: Cookie,
    submitted: Instant,
    started: Option<Instant>,
    completion: Option<Arc<Completion>>,
}

impl Request {
    /// New request with a fresh ticket
    pub fn new(descriptor: TransferDescriptor, cookie: Cookie) -> Self {
        Self {
            descriptor,
            ticket: new_ticket(),
            cookie,
            submitted: Instant::now(),
            started: None,
            completion: None,
        }
    }

    /// New request plus a handle the submitter can wait on
    pub fn with_completion(descriptor: TransferDescriptor, cookie: Cookie) -> (Self, CompletionHandle) {
        let mut request = Self::new(descriptor, cookie);
        let inner = Arc::new(Completion::default());
        request.completion = Some(Arc::clone(&inner));
        let handle = CompletionHandle {
            ticket: request.ticket,
            inner,
        };
        (request, handle)
    }

    /// Ticket
    pub const fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Owner cookie
    pub const fn cookie(&self) -> Cookie {
        self.cookie
    }

    /// Programmed descriptor
    pub const fn descriptor(&self) -> &TransferDescriptor {
        &self.descriptor
    }

    /// Time the request spent queued before a channel took it
    pub fn queued_for(&self) -> Option<Duration> {
        self.started.map(|s| s.saturating_duration_since(self.submitted))
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Time since the hardware was started
    pub(crate) fn elapsed(&self) -> Duration {
        self.started.map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// Wake the submitter, if one is waiting
    pub(crate) fn signal(&self, elapsed: Duration) {
        if let Some(completion) = &self.completion {
            completion.signal(elapsed);
        }
    }
}

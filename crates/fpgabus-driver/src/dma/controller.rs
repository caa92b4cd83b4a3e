// SPDX-License-Identifier: AGPL-3.0-only

//! DMA channel scheduler
//!
//! One lock guards the idle bitmap, the channel table and the pending FIFO
//! together. It is held only for bookkeeping: hardware kick-off and
//! completion signalling happen after it is released.
//!
//! ```text
//! submit ──► lowest idle bit? ──yes──► channel slot ──► engine.start (unlocked)
//!                 │ no
//!                 ▼
//!            pending FIFO ◄──────── complete(irq) pops head onto freed channel
//! ```

use super::{Cookie, Request, Ticket, TransferDescriptor, TransferEngine};
use crate::error::{DriverError, Result};
use fpgabus_chip::regs::MAX_DMA_CHANNELS;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One hardware channel
#[derive(Debug)]
struct Channel {
    irq: Option<u32>,
    in_progress: Option<Request>,
}

#[derive(Debug)]
struct ControllerState {
    channels: Vec<Channel>,
    /// Bit i set = channel i idle
    idle: u32,
    pending: VecDeque<Request>,
}

impl ControllerState {
    fn lowest_idle(&self) -> Option<usize> {
        (self.idle != 0).then(|| self.idle.trailing_zeros() as usize)
    }

    fn channel_for_irq(&self, irq: u32) -> Option<usize> {
        self.channels.iter().position(|c| c.irq == Some(irq))
    }
}

/// A retired request, as reported by [`DmaController::complete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retired {
    /// Channel that ran the transfer
    pub channel: usize,
    /// Ticket issued at submission
    pub ticket: Ticket,
    /// Owner cookie
    pub cookie: Cookie,
    /// Hardware start to completion
    pub elapsed: Duration,
    /// What was transferred
    pub descriptor: TransferDescriptor,
}

/// Scheduler snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaStatus {
    /// Channels managed
    pub channels: usize,
    /// Idle bitmap
    pub idle: u32,
    /// Requests waiting for a channel
    pub queued: usize,
    /// Channels with a transfer in flight
    pub in_flight: usize,
}

impl std::fmt::Display for DmaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "DMA channels: {}", self.channels)?;
        writeln!(f, "idle map:     {:#010x}", self.idle)?;
        writeln!(f, "in flight:    {}", self.in_flight)?;
        write!(f, "queued:       {}", self.queued)
    }
}

/// Channel table, idle bitmap and pending FIFO
#[derive(Debug)]
pub struct DmaController {
    state: spin::Mutex<ControllerState>,
    engine: Arc<dyn TransferEngine>,
    capacity: usize,
}

/// Bitmap with one bit per channel
pub(crate) const fn capacity_mask(channels: usize) -> u32 {
    if channels >= 32 {
        u32::MAX
    } else {
        (1u32 << channels) - 1
    }
}

impl DmaController {
    /// Controller for `channels` channels (capped at 32)
    ///
    /// `idle` is the initial idle bitmap; bits past the channel count are
    /// ignored. Channels are not bound to interrupts yet.
    ///
    /// A channel whose idle bit is clear here has no request in its slot,
    /// so it never joins the pool: its interrupts are reported as spurious
    /// until [`DmaController::reset`].
    pub fn new(channels: usize, idle: u32, engine: Arc<dyn TransferEngine>) -> Self {
        let capacity = channels.min(MAX_DMA_CHANNELS);
        if capacity < channels {
            tracing::warn!("{channels} DMA channels reported, using {capacity}");
        }
        let state = ControllerState {
            channels: (0..capacity)
                .map(|_| Channel {
                    irq: None,
                    in_progress: None,
                })
                .collect(),
            idle: idle & capacity_mask(capacity),
            pending: VecDeque::new(),
        };
        tracing::debug!("DMA controller: {capacity} channels, idle {:#x}", state.idle);
        if state.idle != capacity_mask(capacity) {
            tracing::info!(
                "DMA channels busy at start stay out of the pool: {:#x}",
                !state.idle & capacity_mask(capacity)
            );
        }
        Self {
            state: spin::Mutex::new(state),
            engine,
            capacity,
        }
    }

    /// Number of channels
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bind a channel to the interrupt that reports its completion
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a channel past the table or an
    /// interrupt already bound to another channel.
    pub fn enable_channel(&self, channel: usize, irq: u32) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(other) = state.channel_for_irq(irq).filter(|&c| c != channel) {
            return Err(DriverError::invalid_argument(format!(
                "irq {irq} already bound to channel {other}"
            )));
        }
        let slot = state.channels.get_mut(channel).ok_or_else(|| {
            DriverError::invalid_argument(format!("no DMA channel {channel}"))
        })?;
        slot.irq = Some(irq);
        drop(state);
        tracing::debug!("DMA ch{channel} bound to irq {irq}");
        Ok(())
    }

    /// Bind channel `i` to `irq_base + i` for every channel
    ///
    /// # Errors
    ///
    /// Returns error if an interrupt number would overflow.
    pub fn bind_interrupts(&self, irq_base: u32) -> Result<()> {
        for channel in 0..self.capacity {
            let irq = u32::try_from(channel)
                .ok()
                .and_then(|c| irq_base.checked_add(c))
                .ok_or_else(|| DriverError::invalid_argument("irq number overflow"))?;
            self.enable_channel(channel, irq)?;
        }
        Ok(())
    }

    /// Channel bound to `irq`
    pub fn interrupt_to_channel(&self, irq: u32) -> Option<usize> {
        self.state.lock().channel_for_irq(irq)
    }

    /// Queue a request; returns its ticket immediately
    ///
    /// The request starts on the lowest idle channel, or waits in the FIFO
    /// until a completion frees one. The ticket does not mean the transfer
    /// has started.
    pub fn submit(&self, mut request: Request) -> Ticket {
        let ticket = request.ticket();
        let start = {
            let mut state = self.state.lock();
            if let Some(channel) = state.lowest_idle() {
                state.idle &= !(1 << channel);
                request.mark_started();
                let descriptor = *request.descriptor();
                state.channels[channel].in_progress = Some(request);
                Some((channel, descriptor))
            } else {
                state.pending.push_back(request);
                tracing::debug!("Ticket {ticket} queued ({} pending)", state.pending.len());
                None
            }
        };

        if let Some((channel, descriptor)) = start {
            tracing::debug!("Ticket {ticket} started on ch{channel}");
            self.kick_off(channel, &descriptor);
        }
        ticket
    }

    /// Retire the request on the channel bound to `irq`
    ///
    /// Signals the submitter's completion handle, then starts the next
    /// queued request on the freed channel.
    ///
    /// # Errors
    ///
    /// Returns `SpuriousInterrupt` if `irq` maps to no channel or the
    /// channel has nothing in flight; nothing is changed in that case.
    pub fn complete(&self, irq: u32) -> Result<Retired> {
        let (channel, request, next) = {
            let mut state = self.state.lock();
            let Some(channel) = state.channel_for_irq(irq) else {
                drop(state);
                tracing::warn!("Spurious DMA interrupt {irq}: no channel");
                return Err(DriverError::SpuriousInterrupt { irq, channel: None });
            };
            let Some(request) = state.channels[channel].in_progress.take() else {
                drop(state);
                tracing::warn!("Spurious DMA interrupt {irq}: ch{channel} idle");
                return Err(DriverError::SpuriousInterrupt {
                    irq,
                    channel: Some(channel),
                });
            };
            let next = match state.pending.pop_front() {
                Some(mut queued) => {
                    queued.mark_started();
                    let descriptor = *queued.descriptor();
                    let ticket = queued.ticket();
                    state.channels[channel].in_progress = Some(queued);
                    Some((ticket, descriptor))
                }
                None => {
                    state.idle |= 1 << channel;
                    None
                }
            };
            (channel, request, next)
        };

        let elapsed = request.elapsed();
        request.signal(elapsed);
        let retired = Retired {
            channel,
            ticket: request.ticket(),
            cookie: request.cookie(),
            elapsed,
            descriptor: *request.descriptor(),
        };
        drop(request);
        tracing::debug!(
            "Ticket {} done on ch{channel} in {}us",
            retired.ticket,
            elapsed.as_micros()
        );

        if let Some((ticket, descriptor)) = next {
            tracing::debug!("Ticket {ticket} promoted onto ch{channel}");
            self.kick_off(channel, &descriptor);
        }
        Ok(retired)
    }

    /// Drop every in-flight and queued request without signalling anyone
    ///
    /// Returns how many requests were discarded. Only meaningful for a
    /// simulated controller; real hardware keeps running.
    pub fn reset(&self) -> usize {
        let discarded: Vec<Request> = {
            let mut state = self.state.lock();
            let mut discarded: Vec<Request> = state
                .channels
                .iter_mut()
                .filter_map(|c| c.in_progress.take())
                .collect();
            discarded.extend(state.pending.drain(..));
            state.idle = capacity_mask(self.capacity);
            discarded
        };
        let n = discarded.len();
        drop(discarded);
        tracing::info!("DMA controller reset, {n} requests discarded");
        n
    }

    /// Idle bitmap
    pub fn idle_bitmap(&self) -> u32 {
        self.state.lock().idle
    }

    /// Ticket in flight on `channel`
    pub fn in_flight(&self, channel: usize) -> Option<Ticket> {
        self.state
            .lock()
            .channels
            .get(channel)
            .and_then(|c| c.in_progress.as_ref().map(Request::ticket))
    }

    /// Tickets waiting for a channel, oldest first
    pub fn queued(&self) -> Vec<Ticket> {
        self.state.lock().pending.iter().map(Request::ticket).collect()
    }

    /// Snapshot for diagnostics
    pub fn status(&self) -> DmaStatus {
        let state = self.state.lock();
        DmaStatus {
            channels: self.capacity,
            idle: state.idle,
            queued: state.pending.len(),
            in_flight: state
                .channels
                .iter()
                .filter(|c| c.in_progress.is_some())
                .count(),
        }
    }

    fn kick_off(&self, channel: usize, descriptor: &TransferDescriptor) {
        if let Err(e) = self.engine.start(channel, descriptor) {
            tracing::error!("DMA ch{channel} kick-off failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::Direction;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingEngine(Mutex<Vec<(usize, TransferDescriptor)>>);

    impl TransferEngine for RecordingEngine {
        fn start(&self, channel: usize, descriptor: &TransferDescriptor) -> Result<()> {
            self.0.lock().unwrap().push((channel, *descriptor));
            Ok(())
        }
    }

    fn controller(channels: usize) -> (DmaController, Arc<RecordingEngine>) {
        let engine = Arc::new(RecordingEngine::default());
        let c = DmaController::new(channels, u32::MAX, engine.clone());
        c.bind_interrupts(10).unwrap();
        (c, engine)
    }

    fn request(len: u32) -> Request {
        Request::new(
            TransferDescriptor::between(Direction::Down, 0x1000, 0x2000, len),
            Cookie::new(1),
        )
    }

    #[test]
    fn capacity_capped_and_idle_masked() {
        let engine = Arc::new(RecordingEngine::default());
        let c = DmaController::new(40, u32::MAX, engine.clone());
        assert_eq!(c.capacity(), 32);
        assert_eq!(c.idle_bitmap(), u32::MAX);
        let c = DmaController::new(3, u32::MAX, engine);
        assert_eq!(c.idle_bitmap(), 0b111);
    }

    #[test]
    fn capacity_mask_widths() {
        assert_eq!(capacity_mask(0), 0);
        assert_eq!(capacity_mask(4), 0b1111);
        assert_eq!(capacity_mask(31), 0x7fff_ffff);
        assert_eq!(capacity_mask(32), u32::MAX);
    }

    #[test]
    fn busy_at_start_stays_out_until_reset() {
        let engine = Arc::new(RecordingEngine::default());
        let c = DmaController::new(2, 0b10, engine.clone());
        c.bind_interrupts(10).unwrap();

        let first = c.submit(request(1));
        assert_eq!(c.in_flight(1), Some(first));
        assert!(matches!(
            c.complete(10),
            Err(DriverError::SpuriousInterrupt { channel: Some(0), .. })
        ));
        let second = c.submit(request(2));
        assert_eq!(c.queued(), vec![second]);

        c.reset();
        assert_eq!(c.idle_bitmap(), 0b11);
    }

    #[test]
    fn lowest_free_channel_first() {
        let (c, engine) = controller(4);
        c.submit(request(1));
        c.submit(request(2));
        assert_eq!(c.idle_bitmap(), 0b1100);
        c.complete(10).unwrap();
        c.submit(request(3));
        let channels: Vec<usize> = engine.0.lock().unwrap().iter().map(|(ch, _)| *ch).collect();
        assert_eq!(channels, [0, 1, 0]);
    }

    #[test]
    fn busy_at_init_is_respected() {
        let engine = Arc::new(RecordingEngine::default());
        let c = DmaController::new(2, 0b10, engine.clone());
        c.submit(request(1));
        assert_eq!(engine.0.lock().unwrap()[0].0, 1);
    }

    #[test]
    fn irq_binding_conflict() {
        let (c, _) = controller(2);
        assert!(c.enable_channel(1, 10).is_err());
        assert!(c.enable_channel(5, 99).is_err());
        assert_eq!(c.interrupt_to_channel(11), Some(1));
    }

    #[test]
    fn retired_carries_ticket_and_cookie() {
        let (c, _) = controller(1);
        let r = Request::new(
            TransferDescriptor::between(Direction::Up, 0, 0, 32),
            Cookie::new(0xabc),
        );
        let ticket = c.submit(r);
        let retired = c.complete(10).unwrap();
        assert_eq!(retired.ticket, ticket);
        assert_eq!(retired.cookie, Cookie::new(0xabc));
        assert_eq!(retired.channel, 0);
        assert_eq!(retired.descriptor.direction, Direction::Up);
    }

    #[test]
    fn status_display() {
        let (c, _) = controller(1);
        c.submit(request(1));
        c.submit(request(2));
        let s = c.status();
        assert_eq!((s.in_flight, s.queued, s.idle), (1, 1, 0));
        assert!(s.to_string().contains("queued:       1"));
    }

    #[test]
    fn reset_discards_without_signalling() {
        let (c, engine) = controller(1);
        let (r, handle) = Request::with_completion(
            TransferDescriptor::between(Direction::Down, 0, 0, 4),
            Cookie::new(1),
        );
        c.submit(r);
        c.submit(request(2));
        assert_eq!(c.reset(), 2);
        assert!(!handle.is_complete());
        assert_eq!(c.idle_bitmap(), 1);
        assert!(c.queued().is_empty());
        assert!(c.complete(10).is_err());
        assert_eq!(engine.0.lock().unwrap().len(), 1);
    }
}

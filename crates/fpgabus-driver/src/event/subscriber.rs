// SPDX-License-Identifier: AGPL-3.0-only

//! Per-session event queue

use super::{Event, EventPayload};
use crate::dma::Cookie;
use crate::error::{DriverError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

/// One event consumer with its filters and bounded queue
///
/// The queue lock is a spin lock held only for push/pop, so producers on
/// the interrupt path never sleep on it. Readers that want to block use
/// [`Subscriber::wait_readable`], which sleeps on a separate condition
/// variable.
#[derive(Debug)]
pub struct Subscriber {
    id: Cookie,
    enable_mask: AtomicU32,
    irq_mask: AtomicU32,
    depth: usize,
    queue: spin::Mutex<VecDeque<Event>>,
    wake_seq: Mutex<u64>,
    ready: Condvar,
    dropped: AtomicU64,
}

impl Subscriber {
    /// New subscriber with empty masks and room for `depth` events
    pub fn new(id: Cookie, depth: usize) -> Self {
        Self {
            id,
            enable_mask: AtomicU32::new(0),
            irq_mask: AtomicU32::new(0),
            depth,
            queue: spin::Mutex::new(VecDeque::with_capacity(depth)),
            wake_seq: Mutex::new(0),
            ready: Condvar::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Identity; also the cookie of transfers this subscriber submits
    pub const fn id(&self) -> Cookie {
        self.id
    }

    /// Event types this subscriber receives
    pub fn enable_mask(&self) -> u32 {
        self.enable_mask.load(Ordering::Acquire)
    }

    /// Replace the event type filter
    pub fn set_enable_mask(&self, mask: u32) {
        self.enable_mask.store(mask, Ordering::Release);
    }

    /// Interrupt sources forwarded to this subscriber
    pub fn irq_mask(&self) -> u32 {
        self.irq_mask.load(Ordering::Acquire)
    }

    /// Replace the interrupt source filter
    pub fn set_irq_mask(&self, mask: u32) {
        self.irq_mask.store(mask, Ordering::Release);
    }

    /// Maximum pending events
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Pending event count
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Delivery predicate
    pub fn wants(&self, event: &Event) -> bool {
        if self.enable_mask() & event.kind().bit() == 0 {
            return false;
        }
        match event.payload() {
            EventPayload::Interrupt { source } => self.irq_mask() & source != 0,
            EventPayload::DmaDone { cookie, .. } => *cookie == self.id,
            EventPayload::RegisterWrite(_) | EventPayload::RegisterRead(_) => true,
        }
    }

    /// Append an event and wake readers
    ///
    /// # Errors
    ///
    /// Returns `QueueOverflow` if `depth` events are already pending; the
    /// event is dropped.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        {
            let mut queue = self.queue.lock();
            if queue.len() >= self.depth {
                drop(queue);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(DriverError::QueueOverflow { depth: self.depth });
            }
            queue.push_back(event);
        }
        self.wake();
        Ok(())
    }

    /// Pop the oldest event, stamping its delivery time
    pub fn dequeue(&self) -> Option<Event> {
        let mut event = self.queue.lock().pop_front()?;
        event.stamp_delivered(SystemTime::now());
        Some(event)
    }

    /// Whether an event is ready
    pub fn poll(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    /// Block until an event is pending or `timeout` elapses
    ///
    /// Returns whether the queue is readable. Does not dequeue.
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        // `None` when the timeout is too large to represent: wait unbounded
        let deadline = Instant::now().checked_add(timeout);
        let mut seq = self.wake_seq.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.poll() {
                return true;
            }
            seq = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.ready
                        .wait_timeout(seq, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.ready.wait(seq).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Drop every pending event
    pub fn clear(&self) -> usize {
        let mut queue = self.queue.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    fn wake(&self) {
        let mut seq = self.wake_seq.lock().unwrap_or_else(PoisonError::into_inner);
        *seq = seq.wrapping_add(1);
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::Ticket;
    use fpgabus_chip::event::{TYPE_ALL, TYPE_DMA_DONE, TYPE_IRQ};
    use std::sync::Arc;

    fn subscriber(id: u64) -> Subscriber {
        let s = Subscriber::new(Cookie::new(id), 20);
        s.set_enable_mask(TYPE_ALL);
        s
    }

    #[test]
    fn masks_start_empty() {
        let s = Subscriber::new(Cookie::new(1), 4);
        assert_eq!(s.enable_mask(), 0);
        assert!(!s.wants(&Event::interrupt(1)));
    }

    #[test]
    fn interrupt_needs_source_bit() {
        let s = subscriber(1);
        s.set_irq_mask(1 << 17);
        assert!(s.wants(&Event::interrupt(1 << 17)));
        assert!(!s.wants(&Event::interrupt(1 << 8)));
    }

    #[test]
    fn dma_done_only_for_owner() {
        let s = subscriber(7);
        let mine = Event::dma_done(Ticket::from_raw(1), Duration::ZERO, Cookie::new(7));
        let theirs = Event::dma_done(Ticket::from_raw(2), Duration::ZERO, Cookie::new(8));
        assert!(s.wants(&mine));
        assert!(!s.wants(&theirs));
        s.set_enable_mask(TYPE_IRQ);
        assert!(!s.wants(&mine));
        s.set_enable_mask(TYPE_DMA_DONE);
        assert!(s.wants(&mine));
    }

    #[test]
    fn overflow_drops_newest() {
        let s = subscriber(1);
        for src in 0..20 {
            s.enqueue(Event::interrupt(1 << src)).unwrap();
        }
        let err = s.enqueue(Event::interrupt(1 << 31)).unwrap_err();
        assert!(matches!(err, DriverError::QueueOverflow { depth: 20 }));
        assert_eq!(s.pending(), 20);
        assert_eq!(s.dropped(), 1);
        assert_eq!(
            s.dequeue().unwrap().payload(),
            &EventPayload::Interrupt { source: 1 }
        );
    }

    #[test]
    fn dequeue_stamps_delivery_and_keeps_order() {
        let s = subscriber(1);
        s.enqueue(Event::interrupt(1)).unwrap();
        s.enqueue(Event::interrupt(2)).unwrap();
        let first = s.dequeue().unwrap();
        assert!(first.delivered().is_some());
        assert_eq!(first.payload(), &EventPayload::Interrupt { source: 1 });
        assert_eq!(s.dequeue().unwrap().payload(), &EventPayload::Interrupt { source: 2 });
        assert!(s.dequeue().is_none());
    }

    #[test]
    fn wait_readable_wakes_on_enqueue() {
        let s = Arc::new(subscriber(1));
        let producer = {
            let s = Arc::clone(&s);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                s.enqueue(Event::interrupt(1)).unwrap();
            })
        };
        assert!(s.wait_readable(Duration::from_secs(5)));
        producer.join().unwrap();
        assert!(s.poll());
    }

    #[test]
    fn wait_readable_times_out() {
        let s = subscriber(1);
        assert!(!s.wait_readable(Duration::from_millis(10)));
    }

    #[test]
    fn wait_readable_unbounded_with_event_pending() {
        let s = subscriber(1);
        s.enqueue(Event::interrupt(1 << 17)).unwrap();
        assert!(s.wait_readable(Duration::MAX));
        assert_eq!(s.pending(), 1);
    }

    #[test]
    fn wait_readable_unbounded_wakes_on_enqueue() {
        let s = Arc::new(subscriber(1));
        let producer = {
            let s = Arc::clone(&s);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                s.enqueue(Event::interrupt(1)).unwrap();
            })
        };
        assert!(s.wait_readable(Duration::MAX));
        producer.join().unwrap();
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Subscriber registry and fan-out

use super::{Event, EventSink, Subscriber};
use crate::dma::Cookie;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers whose filters matched
    pub matched: usize,
    /// Copies enqueued
    pub delivered: usize,
    /// Copies dropped on full queues
    pub dropped: usize,
}

/// Set of live subscribers
///
/// Holds weak references only; sessions own their subscribers and
/// unregister them on close. Entries whose session vanished without
/// unregistering are pruned during the next publish.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: spin::Mutex<Vec<Weak<Subscriber>>>,
}

impl SubscriberRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber
    pub fn register(&self, subscriber: &Arc<Subscriber>) {
        self.subscribers.lock().push(Arc::downgrade(subscriber));
        tracing::debug!("Registered subscriber {}", subscriber.id());
    }

    /// Remove a subscriber; returns whether it was present
    pub fn unregister(&self, id: Cookie) -> bool {
        let mut list = self.subscribers.lock();
        let before = list.len();
        list.retain(|w| w.upgrade().is_some_and(|s| s.id() != id));
        let removed = list.len() < before;
        drop(list);
        if removed {
            tracing::debug!("Unregistered subscriber {id}");
        }
        removed
    }

    /// Live subscriber count
    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Whether no subscriber is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stamp the event and enqueue a copy on every matching subscriber
    pub fn publish(&self, mut event: Event) -> PublishReport {
        event.stamp_produced(SystemTime::now());

        let mut report = PublishReport::default();
        let mut list = self.subscribers.lock();
        list.retain(|weak| {
            let Some(subscriber) = weak.upgrade() else {
                return false;
            };
            if subscriber.wants(&event) {
                report.matched += 1;
                match subscriber.enqueue(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        report.dropped += 1;
                        tracing::warn!("Subscriber {}: {e} ({})", subscriber.id(), event.kind());
                    }
                }
            }
            true
        });
        drop(list);

        tracing::trace!("Published {event}: {report:?}");
        report
    }
}

#[cfg(test)]
impl SubscriberRegistry {
    /// Hold the subscriber list lock; stalls every publish until dropped
    pub(crate) fn hold(&self) -> spin::MutexGuard<'_, Vec<Weak<Subscriber>>> {
        self.subscribers.lock()
    }
}

impl EventSink for SubscriberRegistry {
    fn emit(&self, event: Event) {
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::Ticket;
    use fpgabus_chip::event::{TYPE_ALL, TYPE_DMA_DONE};
    use std::time::Duration;

    fn subscriber(registry: &SubscriberRegistry, id: u64, mask: u32) -> Arc<Subscriber> {
        let s = Arc::new(Subscriber::new(Cookie::new(id), 20));
        s.set_enable_mask(mask);
        registry.register(&s);
        s
    }

    #[test]
    fn dma_done_reaches_owner_only() {
        let registry = SubscriberRegistry::new();
        let subs: Vec<_> = (1..=4).map(|id| subscriber(&registry, id, TYPE_ALL)).collect();

        let report = registry.publish(Event::dma_done(
            Ticket::from_raw(9),
            Duration::from_micros(5),
            Cookie::new(3),
        ));
        assert_eq!(report.delivered, 1);
        for s in &subs {
            assert_eq!(s.pending(), usize::from(s.id() == Cookie::new(3)));
        }
    }

    #[test]
    fn interrupt_fans_out_to_every_forwarder() {
        let registry = SubscriberRegistry::new();
        let a = subscriber(&registry, 1, TYPE_ALL);
        let b = subscriber(&registry, 2, TYPE_ALL);
        let c = subscriber(&registry, 3, TYPE_DMA_DONE);
        a.set_irq_mask(u32::MAX);
        b.set_irq_mask(1 << 12);
        c.set_irq_mask(u32::MAX);

        let report = registry.publish(Event::interrupt(1 << 12));
        assert_eq!(report, PublishReport { matched: 2, delivered: 2, dropped: 0 });
        let got = a.dequeue().unwrap();
        assert!(got.produced().is_some());
        assert_eq!(b.pending(), 1);
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn unregister_stops_delivery() {
        let registry = SubscriberRegistry::new();
        let a = subscriber(&registry, 1, TYPE_ALL);
        a.set_irq_mask(u32::MAX);
        assert!(registry.unregister(a.id()));
        assert!(!registry.unregister(a.id()));
        registry.publish(Event::interrupt(1));
        assert_eq!(a.pending(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let registry = SubscriberRegistry::new();
        drop(subscriber(&registry, 1, TYPE_ALL));
        let report = registry.publish(Event::interrupt(1));
        assert_eq!(report.matched, 0);
        assert_eq!(registry.subscribers.lock().len(), 0);
    }

    #[test]
    fn full_queue_reports_drop() {
        let registry = SubscriberRegistry::new();
        let a = subscriber(&registry, 1, TYPE_ALL);
        a.set_irq_mask(1);
        for _ in 0..20 {
            registry.publish(Event::interrupt(1));
        }
        let report = registry.publish(Event::interrupt(1));
        assert_eq!(report.dropped, 1);
        assert_eq!(a.pending(), 20);
    }
}

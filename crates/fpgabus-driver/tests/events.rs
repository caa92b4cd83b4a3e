// SPDX-License-Identifier: AGPL-3.0-only

//! Event routing tests against the simulator device

use fpgabus_driver::event_type::{TYPE_ALL, TYPE_DMA_DONE, TYPE_IRQ, TYPE_WRITE_REGB};
use fpgabus_driver::{Direction, DriverConfig, EventKind, EventPayload, FpgaDevice, IrqOutcome};
use std::time::Duration;

const DMA_IRQ_SOURCE: u32 = 1; // vector 0
const MANUAL_IRQ: u32 = 1 << 17;

fn device() -> FpgaDevice {
    FpgaDevice::simulator().expect("simulator device")
}

#[test]
fn test_dma_done_reaches_only_the_owner() {
    let dev = device();
    let sessions: Vec<_> = (0..5).map(|_| dev.open()).collect();
    for s in &sessions {
        s.set_event_mask(TYPE_ALL);
        s.set_irq_forwarding_mask(u32::MAX);
    }

    let owner = &sessions[2];
    let ticket = owner
        .submit_transfer(Direction::Up, 0x2000, 0x100, 512)
        .unwrap();
    assert!(matches!(
        owner.simulate_irq(DMA_IRQ_SOURCE).unwrap(),
        IrqOutcome::DmaDone(_)
    ));
    dev.flush_events();

    for s in &sessions {
        let event = s.dequeue_event();
        if s.id() == owner.id() {
            let event = event.expect("owner gets dma-done");
            assert_eq!(event.kind(), EventKind::DmaDone);
            assert_eq!(event.ticket(), Some(ticket));
            assert_eq!(event.cookie(), Some(owner.id()));
            assert!(event.produced().is_some());
            assert!(event.delivered().is_some());
        } else {
            assert!(event.is_none(), "session {} saw another's completion", s.id());
        }
    }
}

#[test]
fn test_roundtrip_ticket_and_cookie() {
    let dev = device();
    let s = dev.open();
    s.set_event_mask(TYPE_DMA_DONE);

    for _ in 0..10 {
        let ticket = s.submit_transfer(Direction::Down, 0x4000, 0, 64).unwrap();
        s.simulate_irq(DMA_IRQ_SOURCE).unwrap();
        dev.flush_events();
        let event = s.dequeue_event().expect("dma-done");
        match event.payload() {
            EventPayload::DmaDone { ticket: t, cookie, .. } => {
                assert_eq!(*t, ticket);
                assert_eq!(*cookie, s.id());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
    assert!(s.dequeue_event().is_none());
}

#[test]
fn test_queued_transfers_complete_in_order() {
    let dev = device();
    let s = dev.open();
    s.set_event_mask(TYPE_DMA_DONE);

    let tickets: Vec<_> = (0..4)
        .map(|i| s.submit_transfer(Direction::Down, 0x100 * i, 0, 32).unwrap())
        .collect();
    assert_eq!(dev.dma_status().queued, 3);

    for _ in 0..4 {
        s.simulate_irq(DMA_IRQ_SOURCE).unwrap();
    }
    dev.flush_events();

    let seen: Vec<_> = std::iter::from_fn(|| s.dequeue_event())
        .filter_map(|e| e.ticket())
        .collect();
    assert_eq!(seen, tickets);
}

#[test]
fn test_overflow_drops_newest_without_growth() {
    let dev = device();
    let s = dev.open();
    s.set_event_mask(TYPE_IRQ);
    s.set_irq_forwarding_mask(MANUAL_IRQ);

    for cycle in 0..50 {
        for _ in 0..25 {
            s.simulate_irq(MANUAL_IRQ).unwrap();
            dev.flush_events();
        }
        assert_eq!(s.pending_events(), 20, "cycle {cycle}");

        let drained = std::iter::from_fn(|| s.dequeue_event()).count();
        assert_eq!(drained, 20);
        assert_eq!(s.pending_events(), 0);
    }
    assert_eq!(s.dropped_events(), 50 * 5);
}

#[test]
fn test_custom_queue_depth() {
    let dev = FpgaDevice::new(DriverConfig::simulator().with_event_queue_depth(3)).unwrap();
    let s = dev.open();
    s.set_event_mask(TYPE_IRQ);
    s.set_irq_forwarding_mask(MANUAL_IRQ);
    for _ in 0..5 {
        s.simulate_irq(MANUAL_IRQ).unwrap();
    }
    dev.flush_events();
    assert_eq!(s.pending_events(), 3);
}

#[test]
fn test_irq_forwarding_mask_filters_sources() {
    let dev = device();
    let vin0 = dev.open();
    let all = dev.open();
    let none = dev.open();
    vin0.set_event_mask(TYPE_IRQ);
    vin0.set_irq_forwarding_mask(1 << 12);
    all.set_event_mask(TYPE_IRQ);
    all.set_irq_forwarding_mask(u32::MAX);
    none.set_event_mask(TYPE_DMA_DONE);
    none.set_irq_forwarding_mask(u32::MAX);

    for source in [1 << 12, 1 << 13, 1 << 14] {
        dev.simulate_irq(source).unwrap();
    }
    dev.flush_events();

    assert_eq!(vin0.pending_events(), 1);
    assert_eq!(all.pending_events(), 3);
    assert_eq!(none.pending_events(), 0);
}

#[test]
fn test_register_write_event_from_kick_off() {
    use fpgabus_chip::regs::dma;
    use fpgabus_driver::register_mode::{DEFAULT, WRITE_EVENT};

    let dev = device();
    let s = dev.open();
    s.set_event_mask(TYPE_WRITE_REGB | TYPE_DMA_DONE);
    s.set_register_mode(0, dma::START, DEFAULT | WRITE_EVENT).unwrap();

    let ticket = s.submit_transfer(Direction::Down, 0x8000, 0x40, 128).unwrap();

    // Register events are published inline
    let start = s.dequeue_event().expect("write event for START");
    match start.payload() {
        EventPayload::RegisterWrite(access) => {
            assert_eq!((access.bar, access.offset, access.value), (0, dma::START, 1));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(s.read_register(0, dma::LEN_BYTES).unwrap(), 128);
    assert_eq!(s.read_register(0, dma::SRC_ADDR).unwrap(), 0x8000);

    s.simulate_irq(DMA_IRQ_SOURCE).unwrap();
    dev.flush_events();
    assert_eq!(s.dequeue_event().and_then(|e| e.ticket()), Some(ticket));
}

#[test]
fn test_wait_readable_sees_deferred_event() {
    let dev = device();
    let s = dev.open();
    s.set_event_mask(TYPE_IRQ);
    s.set_irq_forwarding_mask(MANUAL_IRQ);
    assert!(!s.poll());

    let irq_dev = dev.clone();
    let raiser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        irq_dev.simulate_irq(MANUAL_IRQ).unwrap();
    });
    assert!(s.wait_readable(Duration::from_secs(5)));
    raiser.join().unwrap();
    assert!(s.poll());
    assert_eq!(dev.stats().polls, 3);
}

#[test]
fn test_wait_readable_forever_with_event_pending() {
    let dev = device();
    let s = dev.open();
    s.set_event_mask(TYPE_IRQ);
    s.set_irq_forwarding_mask(MANUAL_IRQ);
    dev.simulate_irq(MANUAL_IRQ).unwrap();
    dev.flush_events();

    assert!(s.wait_readable(Duration::MAX));
    assert_eq!(s.pending_events(), 1);
}

#[test]
fn test_closed_session_stops_receiving() {
    let dev = device();
    let a = dev.open();
    let b = dev.open();
    a.set_event_mask(TYPE_IRQ);
    a.set_irq_forwarding_mask(MANUAL_IRQ);
    b.set_event_mask(TYPE_IRQ);
    b.set_irq_forwarding_mask(MANUAL_IRQ);

    dev.simulate_irq(MANUAL_IRQ).unwrap();
    dev.flush_events();
    a.close();
    dev.simulate_irq(MANUAL_IRQ).unwrap();
    dev.flush_events();

    assert_eq!(b.pending_events(), 2);
    assert_eq!(dev.session_count(), 1);
}

// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end simulator tests: synchronous transfers, simulator memory,
//! controller reset and hardware-only guards.

use fpgabus_driver::event_type::TYPE_DMA_DONE;
use fpgabus_driver::{Direction, DriverConfig, DriverError, FpgaDevice, IrqOutcome};
use std::time::Duration;

#[test]
fn test_submit_and_wait_completes_on_irq() {
    let dev = FpgaDevice::simulator().unwrap();
    let s = dev.open();

    let irq_dev = dev.clone();
    let irq = std::thread::spawn(move || {
        // Keep raising the DMA vector until the transfer has been retired
        for _ in 0..500 {
            if let Ok(IrqOutcome::DmaDone(retired)) = irq_dev.simulate_irq(1) {
                return Some(retired.ticket);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        None
    });

    let (ticket, _elapsed) = s
        .submit_transfer_and_wait(Direction::Up, 0x3000, 0x80, 256)
        .expect("transfer completes");
    assert_eq!(irq.join().unwrap(), Some(ticket));
    assert_eq!(dev.stats().read.bytes, 256);
}

#[test]
fn test_submit_and_wait_times_out() {
    let dev = FpgaDevice::new(DriverConfig::simulator().with_dma_timeout_ms(20)).unwrap();
    let s = dev.open();
    let err = s
        .submit_transfer_and_wait(Direction::Down, 0, 0, 64)
        .unwrap_err();
    assert!(matches!(err, DriverError::Timeout { duration_ms: 20 }));
    assert_eq!(err.errno(), -110);

    // The transfer is still in flight; completing it later is not spurious
    assert!(matches!(dev.simulate_irq(1).unwrap(), IrqOutcome::DmaDone(_)));
}

#[test]
fn test_reset_then_fresh_behaviour() {
    let dev = FpgaDevice::simulator().unwrap();
    let s = dev.open();
    s.set_event_mask(TYPE_DMA_DONE);

    for _ in 0..3 {
        s.submit_transfer(Direction::Down, 0, 0, 32).unwrap();
    }
    assert_eq!(s.reset_dma().unwrap(), 3);
    assert_eq!(s.reset_dma().unwrap(), 0);
    assert_eq!(s.simulate_irq(1).unwrap(), IrqOutcome::Spurious);

    let ticket = s.submit_transfer(Direction::Down, 0, 0, 32).unwrap();
    assert_eq!(dev.dma().in_flight(0), Some(ticket));
    s.simulate_irq(1).unwrap();
    dev.flush_events();
    assert_eq!(s.dequeue_event().and_then(|e| e.ticket()), Some(ticket));
    assert!(s.dequeue_event().is_none());
}

#[test]
fn test_simulator_memory_roundtrip() {
    let dev = FpgaDevice::simulator().unwrap();
    let owner = dev.open();
    owner.setup_simulator_memory(4096).unwrap();

    let mut frame: Vec<u8> = (0..=255).collect();
    owner
        .simulate_dma_transfer(Direction::Down, 1024, &mut frame)
        .unwrap();
    let mut back = vec![0u8; 256];
    owner
        .simulate_dma_transfer(Direction::Up, 1024, &mut back)
        .unwrap();
    assert_eq!(back, frame);

    let mut too_big = vec![0u8; 64];
    assert!(matches!(
        owner.simulate_dma_transfer(Direction::Up, 4064, &mut too_big),
        Err(DriverError::OutOfRange { .. })
    ));

    let intruder = dev.open();
    assert!(matches!(
        intruder.simulate_dma_transfer(Direction::Up, 0, &mut back),
        Err(DriverError::NotOwner { .. })
    ));
}

#[test]
fn test_status_reports_queue() {
    let dev = FpgaDevice::simulator().unwrap();
    let s = dev.open();
    s.submit_transfer(Direction::Down, 0, 0, 32).unwrap();
    s.submit_transfer(Direction::Down, 0, 0, 32).unwrap();
    let status = dev.dma_status();
    assert_eq!((status.channels, status.in_flight, status.queued), (1, 1, 1));
    assert_eq!(status.idle, 0);
}

#[test]
fn test_missing_hardware_fails_cleanly() {
    let err = FpgaDevice::new(DriverConfig::pcie("ffff:ff:1f.7", 32)).unwrap_err();
    assert!(matches!(err, DriverError::BarDisabled { bar: 0 }));
}

#[test]
#[ignore = "requires the board on PCIe (FPGABUS_PCIE_ADDR)"]
fn test_hardware_rejects_simulator_operations() {
    let mut config = DriverConfig::from_env().unwrap();
    if config.mode.is_simulator() {
        config.mode = fpgabus_driver::AccessMode::Pcie;
    }
    let dev = FpgaDevice::new(config).unwrap();
    let s = dev.open();
    assert!(matches!(s.reset_dma(), Err(DriverError::NotSimulator { .. })));
    assert!(matches!(
        s.simulate_irq(1),
        Err(DriverError::NotSimulator { .. })
    ));
    assert!(matches!(
        s.setup_simulator_memory(16),
        Err(DriverError::NotSimulator { .. })
    ));
    println!("{}", dev.info());
    println!("{}", dev.dma_status());
}

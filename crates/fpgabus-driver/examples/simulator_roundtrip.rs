// SPDX-License-Identifier: AGPL-3.0-only

//! Simulator round trip
//!
//! Queues more transfers than the simulator has channels, completes them
//! with simulated interrupts and prints the dma-done events each session
//! receives.

use fpgabus_driver::prelude::*;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("fpgabus_driver=debug")
        .init();

    let device = FpgaDevice::simulator()?;
    println!("{}\n", device.info());

    let a = device.open();
    let b = device.open();
    for s in [&a, &b] {
        s.set_event_mask(event_type::TYPE_DMA_DONE);
    }

    let tickets = [
        a.submit_transfer(Direction::Down, 0x1000, 0x0, 512)?,
        b.submit_transfer(Direction::Up, 0x2000, 0x200, 256)?,
        a.submit_transfer(Direction::Up, 0x3000, 0x300, 128)?,
    ];
    println!("Submitted tickets {tickets:?}");
    println!("{}\n", device.dma_status());

    for _ in tickets {
        if let IrqOutcome::DmaDone(retired) = device.simulate_irq(1)? {
            println!(
                "channel {} retired ticket {} for session {}",
                retired.channel, retired.ticket, retired.cookie
            );
        }
    }
    device.flush_events();

    for (name, s) in [("a", &a), ("b", &b)] {
        while let Some(event) = s.dequeue_event() {
            println!("session {name}: {event}");
        }
    }

    println!("\n{}", device.stats());
    Ok(())
}

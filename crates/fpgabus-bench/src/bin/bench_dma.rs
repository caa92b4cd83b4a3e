// SPDX-License-Identifier: AGPL-3.0-only

//! DMA scheduler throughput — submit/complete cycles with no hardware.
//!
//! Measures the scheduler alone: a null engine accepts every kick-off and
//! completions are raised round-robin over the channels, so the numbers
//! reflect lock and queue overhead rather than bus bandwidth.
//!
//! Usage:
//!   cargo run --bin bench_dma
//!   cargo run --bin bench_dma -- --channels 8 --transfers 200000

use anyhow::Result;
use fpgabus_driver::dma::{Cookie, DmaController, Request, TransferDescriptor, TransferEngine};
use fpgabus_driver::Direction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const DEFAULT_CHANNELS: usize = 4;
const DEFAULT_TRANSFERS: usize = 100_000;
const DEFAULT_BACKLOG: usize = 64;

#[derive(Debug)]
struct NullEngine;

impl TransferEngine for NullEngine {
    fn start(&self, _channel: usize, _descriptor: &TransferDescriptor) -> fpgabus_driver::Result<()> {
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let channels = parse_arg(&args, "--channels", DEFAULT_CHANNELS).clamp(1, 32);
    let transfers = parse_arg(&args, "--transfers", DEFAULT_TRANSFERS);
    let backlog = parse_arg(&args, "--backlog", DEFAULT_BACKLOG).max(1);

    println!("DMA scheduler benchmark");
    println!("=======================");
    println!("Channels  : {channels}");
    println!("Transfers : {transfers}");
    println!("Backlog   : {backlog}");
    println!();

    let idle = if channels == 32 { u32::MAX } else { (1u32 << channels) - 1 };
    let dma = DmaController::new(channels, idle, Arc::new(NullEngine));
    dma.bind_interrupts(0)?;
    let owner = Cookie::new(1);
    let descriptor = TransferDescriptor::between(Direction::Down, 0, 0, 4096);

    // Immediate start: the lowest idle channel takes every request
    let t0 = Instant::now();
    for _ in 0..transfers {
        dma.submit(Request::new(descriptor, owner));
        dma.complete(0)?;
    }
    print_rate("Idle channel  ", t0.elapsed(), transfers);

    // Queued: keep `backlog` requests waiting behind busy channels
    for _ in 0..channels + backlog {
        dma.submit(Request::new(descriptor, owner));
    }
    let t0 = Instant::now();
    for i in 0..transfers {
        dma.complete(irq_for(i, channels))?;
        dma.submit(Request::new(descriptor, owner));
    }
    print_rate("FIFO promotion", t0.elapsed(), transfers);
    println!();
    println!("{}", dma.status());
    println!("Discarded on reset: {}", dma.reset());

    Ok(())
}

fn irq_for(i: usize, channels: usize) -> u32 {
    u32::try_from(i % channels).unwrap_or(0)
}

fn print_rate(label: &str, elapsed: Duration, ops: usize) {
    let secs = elapsed.as_secs_f64();
    let per_op_ns = secs * 1e9 / ops.max(1) as f64;
    println!(
        "  {}: {:.2} M transfers/s  ({:.0} ns / submit+complete)",
        label,
        ops as f64 / secs / 1e6,
        per_op_ns
    );
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

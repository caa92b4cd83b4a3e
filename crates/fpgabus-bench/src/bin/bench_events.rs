// SPDX-License-Identifier: AGPL-3.0-only

//! Event fan-out benchmark — deferred dispatch to many subscribers.
//!
//! Publishes interrupt events through the dispatcher to a configurable
//! number of sessions and drains their queues between batches. Reports
//! publish rate and how many events were lost to a full dispatch pool or
//! full subscriber queues.
//!
//! Usage:
//!   cargo run --bin bench_events
//!   cargo run --bin bench_events -- --subscribers 32 --events 100000

use anyhow::Result;
use fpgabus_driver::event::{Dispatcher, Subscriber, SubscriberRegistry};
use fpgabus_driver::event_type::TYPE_IRQ;
use fpgabus_driver::{Cookie, DriverConfig, Event};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const DEFAULT_SUBSCRIBERS: usize = 8;
const DEFAULT_EVENTS: usize = 50_000;
const DEFAULT_POOL: usize = 20;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("error".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let subscribers = parse_arg(&args, "--subscribers", DEFAULT_SUBSCRIBERS);
    let events = parse_arg(&args, "--events", DEFAULT_EVENTS);
    let pool = parse_arg(&args, "--pool", DEFAULT_POOL).max(1);

    println!("Event fan-out benchmark");
    println!("=======================");
    println!("Subscribers : {subscribers}");
    println!("Events      : {events}");
    println!("Pool slots  : {pool}");
    println!();

    let depth = DriverConfig::default().event_queue_depth;
    let registry = Arc::new(SubscriberRegistry::new());
    let subs: Vec<Arc<Subscriber>> = (1..=subscribers)
        .map(|i| {
            let s = Arc::new(Subscriber::new(Cookie::new(i as u64), depth));
            s.set_enable_mask(TYPE_IRQ);
            s.set_irq_mask(u32::MAX);
            registry.register(&s);
            s
        })
        .collect();

    // Direct fan-out, no deferral
    let t0 = Instant::now();
    let mut delivered = 0usize;
    for i in 0..events {
        delivered += registry.publish(Event::interrupt(1 << (i % 8))).delivered;
        drain(&subs);
    }
    print_rate("Direct   ", t0.elapsed(), events, delivered);

    // Deferred through the dispatch pool, drained once per pool-full batch
    let dispatcher = Dispatcher::start(Arc::clone(&registry), pool)?;
    let t0 = Instant::now();
    let mut lost_in_pool = 0usize;
    let mut received = 0usize;
    for i in 0..events {
        if dispatcher.dispatch(Event::interrupt(1 << (i % 8))).is_err() {
            lost_in_pool += 1;
        }
        if i % pool == pool - 1 {
            dispatcher.flush();
            received += drain(&subs);
        }
    }
    dispatcher.flush();
    received += drain(&subs);
    print_rate("Deferred ", t0.elapsed(), events, received);

    let overflowed: u64 = subs.iter().map(|s| s.dropped()).sum();
    println!();
    println!("Lost to full dispatch pool : {lost_in_pool}");
    println!("Lost to full event queues  : {overflowed}");

    Ok(())
}

fn drain(subs: &[Arc<Subscriber>]) -> usize {
    let mut n = 0;
    for s in subs {
        while s.dequeue().is_some() {
            n += 1;
        }
    }
    n
}

fn print_rate(label: &str, elapsed: Duration, events: usize, delivered: usize) {
    let secs = elapsed.as_secs_f64();
    println!(
        "  {}: {:.2} M events/s  ({} deliveries, {:.0} ns / event)",
        label,
        events as f64 / secs / 1e6,
        delivered,
        secs * 1e9 / events.max(1) as f64
    );
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

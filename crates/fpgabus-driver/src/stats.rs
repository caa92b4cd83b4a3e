// SPDX-License-Identifier: AGPL-3.0-only

//! Throughput counters
//!
//! Updated from the completion path with relaxed atomics; nothing here
//! takes a lock. Readers get a plain [`StatsSnapshot`].

use crate::dma::Direction;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct DirectionCounters {
    buffers: AtomicU64,
    bytes: AtomicU64,
    speed_last: AtomicU64,
    speed_avg: AtomicU64,
}

impl DirectionCounters {
    fn record(&self, bytes: u64, elapsed: Duration, track_speed: bool) {
        self.buffers.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        if !track_speed {
            return;
        }
        let Some(speed) = bytes_per_second(bytes, elapsed) else {
            return;
        };
        self.speed_last.store(speed, Ordering::Relaxed);
        // Exponential average, weight 1/8 on the newest sample
        let _ = self
            .speed_avg
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |avg| {
                Some(if avg == 0 {
                    speed
                } else {
                    (avg.saturating_mul(7).saturating_add(speed)) / 8
                })
            });
    }

    fn snapshot(&self) -> DirectionStats {
        DirectionStats {
            buffers: self.buffers.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            speed_last: self.speed_last.load(Ordering::Relaxed),
            speed_avg: self.speed_avg.load(Ordering::Relaxed),
        }
    }
}

fn bytes_per_second(bytes: u64, elapsed: Duration) -> Option<u64> {
    let nanos = elapsed.as_nanos();
    if nanos == 0 {
        return None;
    }
    u64::try_from(u128::from(bytes) * 1_000_000_000 / nanos).ok()
}

/// Live device counters
#[derive(Debug, Default)]
pub struct Stats {
    enabled: AtomicBool,
    opens: AtomicU64,
    releases: AtomicU64,
    polls: AtomicU64,
    controls: AtomicU64,
    up: DirectionCounters,
    down: DirectionCounters,
}

impl Stats {
    /// Counters with speed tracking off
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn speed tracking on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether speed tracking is on
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn record_open(&self) {
        self.opens.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_control(&self) {
        self.controls.fetch_add(1, Ordering::Relaxed);
    }

    /// Account a finished transfer
    pub fn record_transfer(&self, direction: Direction, bytes: u32, elapsed: Duration) {
        let counters = match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        };
        counters.record(u64::from(bytes), elapsed, self.is_enabled());
    }

    /// Copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enabled: self.is_enabled(),
            opens: self.opens.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            controls: self.controls.load(Ordering::Relaxed),
            read: self.up.snapshot(),
            write: self.down.snapshot(),
        }
    }
}

/// Counters for one direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionStats {
    /// Completed transfers
    pub buffers: u64,
    /// Bytes moved
    pub bytes: u64,
    /// Most recent speed (bytes/s)
    pub speed_last: u64,
    /// Running average speed (bytes/s)
    pub speed_avg: u64,
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Speed tracking on
    pub enabled: bool,
    /// Sessions opened
    pub opens: u64,
    /// Sessions closed
    pub releases: u64,
    /// Readiness polls
    pub polls: u64,
    /// Control operations
    pub controls: u64,
    /// Device → system (up)
    pub read: DirectionStats,
    /// System → device (down)
    pub write: DirectionStats,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "opens:            {}", self.opens)?;
        writeln!(f, "releases:         {}", self.releases)?;
        writeln!(f, "polls:            {}", self.polls)?;
        writeln!(f, "controls:         {}", self.controls)?;
        writeln!(f, "read buffers:     {}", self.read.buffers)?;
        writeln!(f, "read bytes:       {}", self.read.bytes)?;
        writeln!(f, "write buffers:    {}", self.write.buffers)?;
        writeln!(f, "write bytes:      {}", self.write.bytes)?;
        if self.enabled {
            writeln!(f, "read speed last:  {} kB/s", self.read.speed_last / 1024)?;
            writeln!(f, "read speed avg:   {} kB/s", self.read.speed_avg / 1024)?;
            writeln!(f, "write speed last: {} kB/s", self.write.speed_last / 1024)?;
            write!(f, "write speed avg:  {} kB/s", self.write.speed_avg / 1024)
        } else {
            write!(f, "speed tracking:   disabled")
        }
    }
}

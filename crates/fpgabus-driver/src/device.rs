// SPDX-License-Identifier: AGPL-3.0-only

//! Device context and sessions
//!
//! [`FpgaDevice`] is built once and owns every piece of shared state: the
//! register banks, the DMA scheduler, the subscriber registry, the
//! deferred dispatcher and the counters. [`Session`] is one open handle;
//! its id is the cookie of the transfers it submits, which is how DMA
//! completions find their way back to it.

use crate::bank::RegisterBanks;
use crate::config::DriverConfig;
use crate::dma::{
    probe_channels, BankTransferEngine, CompletionHandle, Cookie, Direction, DmaController,
    DmaStatus, Request, Ticket, TransferDescriptor, TransferEngine,
};
use crate::error::{DriverError, Result};
use crate::event::{Dispatcher, Event, EventSink, Subscriber, SubscriberRegistry};
use crate::irq::{InterruptRouter, IrqOutcome, Route};
use crate::sim_memory::SimulatorMemory;
use crate::stats::{Stats, StatsSnapshot};
use fpgabus_chip::access::AccessMode;
use fpgabus_chip::bar::dma_bar;
use fpgabus_chip::regs::version;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Driver identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Driver version (major, minor, revision)
    pub version: (u8, u8, u8),
    /// Operating mode
    pub mode: AccessMode,
    /// "PCIe" or "memory bus"
    pub interface: &'static str,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, revision) = self.version;
        write!(
            f,
            "fpgabus {major}.{minor}.{revision} ({}, {})",
            self.mode, self.interface
        )
    }
}

#[derive(Debug)]
struct DeviceShared {
    config: DriverConfig,
    banks: RegisterBanks,
    dma: DmaController,
    router: InterruptRouter,
    registry: Arc<SubscriberRegistry>,
    dispatcher: Dispatcher,
    stats: Stats,
    sim_memory: SimulatorMemory,
    next_session: AtomicU64,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        let discarded = self.dma.reset();
        tracing::info!(
            "fpgabus {} device shut down ({discarded} transfers abandoned)",
            self.config.mode
        );
    }
}

/// Shared device context
#[derive(Debug, Clone)]
pub struct FpgaDevice {
    shared: Arc<DeviceShared>,
}

impl FpgaDevice {
    /// Build the device for `config`
    ///
    /// Maps the BARs, probes the DMA controller through the bank that
    /// carries it and starts the event dispatcher.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, a BAR cannot be
    /// mapped or the DMA bank is missing.
    pub fn new(config: DriverConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Simulator device with default settings
    ///
    /// # Errors
    ///
    /// Returns error if the dispatcher thread cannot be started.
    pub fn simulator() -> Result<Self> {
        Self::new(DriverConfig::simulator())
    }

    /// Build with a caller-supplied transfer engine instead of the DMA bank
    ///
    /// # Errors
    ///
    /// As for [`FpgaDevice::new`].
    pub fn with_engine(config: DriverConfig, engine: Arc<dyn TransferEngine>) -> Result<Self> {
        Self::build(config, Some(engine))
    }

    fn build(config: DriverConfig, engine: Option<Arc<dyn TransferEngine>>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(SubscriberRegistry::new());
        let sink: Arc<dyn EventSink> = registry.clone();
        let banks = RegisterBanks::build(&config, &sink)?;

        let dma_index = dma_bar(config.mode);
        let dma_bank = banks
            .bank(dma_index)
            .filter(|b| b.is_enabled())
            .cloned()
            .ok_or(DriverError::BarDisabled {
                bar: u32::try_from(dma_index).unwrap_or(u32::MAX),
            })?;
        let (channels, idle) = probe_channels(config.mode, &dma_bank)?;
        let engine = engine
            .unwrap_or_else(|| Arc::new(BankTransferEngine::new(dma_bank)) as Arc<dyn TransferEngine>);
        let dma = DmaController::new(channels, idle, engine);
        dma.bind_interrupts(config.irq_base)?;

        let dispatcher = Dispatcher::start(Arc::clone(&registry), config.dispatch_pool_size)?;
        let router = InterruptRouter::new(config.mode, config.irq_base);

        tracing::info!(
            "fpgabus device up: {} mode, {channels} DMA channel(s), irq base {}",
            config.mode,
            config.irq_base
        );

        Ok(Self {
            shared: Arc::new(DeviceShared {
                config,
                banks,
                dma,
                router,
                registry,
                dispatcher,
                stats: Stats::new(),
                sim_memory: SimulatorMemory::new(),
                next_session: AtomicU64::new(1),
            }),
        })
    }

    /// Open a session
    pub fn open(&self) -> Session {
        let id = Cookie::new(self.shared.next_session.fetch_add(1, Ordering::Relaxed));
        let subscriber = Arc::new(Subscriber::new(id, self.shared.config.event_queue_depth));
        self.shared.registry.register(&subscriber);
        self.shared.stats.record_open();
        tracing::info!("Session {id} opened");
        Session {
            device: self.clone(),
            subscriber,
        }
    }

    /// Configuration the device was built with
    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    /// Driver identity
    pub fn info(&self) -> DeviceInfo {
        let mode = self.shared.config.mode;
        DeviceInfo {
            version: (version::MAJOR, version::MINOR, version::REVISION),
            mode,
            interface: mode.interface(),
        }
    }

    /// Register banks
    pub fn banks(&self) -> &RegisterBanks {
        &self.shared.banks
    }

    /// DMA scheduler
    pub fn dma(&self) -> &DmaController {
        &self.shared.dma
    }

    /// DMA scheduler snapshot
    pub fn dma_status(&self) -> DmaStatus {
        self.shared.dma.status()
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Turn transfer speed tracking on or off
    pub fn set_stats_enabled(&self, enabled: bool) {
        self.shared.stats.set_enabled(enabled);
    }

    /// Open sessions
    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Wait until every event dispatched so far has been fanned out
    pub fn flush_events(&self) {
        self.shared.dispatcher.flush();
    }

    /// Interrupt entry point
    ///
    /// DMA vectors retire the channel's transfer and dispatch a dma-done
    /// event to its owner; other vectors dispatch an interrupt event.
    /// Spurious DMA interrupts are logged and reported, not failed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for interrupts outside the enabled vectors.
    pub fn handle_interrupt(&self, irq: u32) -> Result<IrqOutcome> {
        let shared = &self.shared;
        match shared.router.route(irq)? {
            Route::Dma { .. } => match shared.dma.complete(irq) {
                Ok(retired) => {
                    shared.stats.record_transfer(
                        retired.descriptor.direction,
                        retired.descriptor.len,
                        retired.elapsed,
                    );
                    shared.dispatcher.emit(Event::dma_done(
                        retired.ticket,
                        retired.elapsed,
                        retired.cookie,
                    ));
                    Ok(IrqOutcome::DmaDone(retired))
                }
                Err(DriverError::SpuriousInterrupt { .. }) => Ok(IrqOutcome::Spurious),
                Err(e) => Err(e),
            },
            Route::Source { vector, name } => {
                let source = fpgabus_chip::msi::msi_to_event(vector);
                tracing::trace!("irq {irq}: {name} (source {source:#x})");
                shared.dispatcher.emit(Event::interrupt(source));
                Ok(IrqOutcome::Forwarded { source })
            }
        }
    }

    /// Raise the interrupt for the lowest bit of `source` (simulator only)
    ///
    /// # Errors
    ///
    /// `NotSimulator` on hardware, `InvalidArgument` for an empty or
    /// unrouted source.
    pub fn simulate_irq(&self, source: u32) -> Result<IrqOutcome> {
        self.require_simulator("simulate_irq")?;
        let irq = self.shared.router.irq_for_source(source)?;
        tracing::debug!("Simulating irq {irq} for source {source:#x}");
        self.handle_interrupt(irq)
    }

    fn require_simulator(&self, operation: &'static str) -> Result<()> {
        if self.shared.config.mode.is_simulator() {
            Ok(())
        } else {
            Err(DriverError::NotSimulator { operation })
        }
    }
}

/// One open handle on the device
///
/// Dropping the session closes it: the subscriber is unregistered, pending
/// events are discarded and simulator memory it owns is released.
#[derive(Debug)]
pub struct Session {
    device: FpgaDevice,
    subscriber: Arc<Subscriber>,
}

impl Session {
    /// Session id; the cookie of every transfer it submits
    pub fn id(&self) -> Cookie {
        self.subscriber.id()
    }

    /// Device this session belongs to
    pub const fn device(&self) -> &FpgaDevice {
        &self.device
    }

    fn shared(&self) -> &DeviceShared {
        self.device.shared.as_ref()
    }

    fn request(&self, direction: Direction, system: u32, device: u32, len: u32) -> Result<TransferDescriptor> {
        if len == 0 {
            return Err(DriverError::invalid_argument("zero-length transfer"));
        }
        self.shared().stats.record_control();
        Ok(TransferDescriptor::between(direction, system, device, len))
    }

    /// Submit a transfer; returns its ticket without waiting
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero length.
    pub fn submit_transfer(
        &self,
        direction: Direction,
        system: u32,
        device: u32,
        len: u32,
    ) -> Result<Ticket> {
        let descriptor = self.request(direction, system, device, len)?;
        Ok(self.shared().dma.submit(Request::new(descriptor, self.id())))
    }

    /// Submit a transfer and get a handle to wait on its completion
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero length.
    pub fn submit_transfer_async(
        &self,
        direction: Direction,
        system: u32,
        device: u32,
        len: u32,
    ) -> Result<CompletionHandle> {
        let descriptor = self.request(direction, system, device, len)?;
        let (request, handle) = Request::with_completion(descriptor, self.id());
        self.shared().dma.submit(request);
        Ok(handle)
    }

    /// Submit a transfer and block until it completes
    ///
    /// Returns the ticket and the transfer time.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` after the configured DMA timeout; the transfer is
    /// not cancelled.
    pub fn submit_transfer_and_wait(
        &self,
        direction: Direction,
        system: u32,
        device: u32,
        len: u32,
    ) -> Result<(Ticket, Duration)> {
        let handle = self.submit_transfer_async(direction, system, device, len)?;
        let elapsed = handle.wait(self.shared().config.dma_timeout())?;
        Ok((handle.ticket(), elapsed))
    }

    /// Next pending event, if any
    pub fn dequeue_event(&self) -> Option<Event> {
        self.subscriber.dequeue()
    }

    /// Whether an event is pending
    pub fn poll(&self) -> bool {
        self.shared().stats.record_poll();
        self.subscriber.poll()
    }

    /// Block until an event is pending or `timeout` elapses
    pub fn wait_readable(&self, timeout: Duration) -> bool {
        self.shared().stats.record_poll();
        self.subscriber.wait_readable(timeout)
    }

    /// Pending event count
    pub fn pending_events(&self) -> usize {
        self.subscriber.pending()
    }

    /// Events dropped on a full queue
    pub fn dropped_events(&self) -> u64 {
        self.subscriber.dropped()
    }

    /// Select which event types this session receives
    pub fn set_event_mask(&self, mask: u32) {
        self.shared().stats.record_control();
        self.subscriber.set_enable_mask(mask);
    }

    /// Select which interrupt sources this session receives
    pub fn set_irq_forwarding_mask(&self, mask: u32) {
        self.shared().stats.record_control();
        self.subscriber.set_irq_mask(mask);
    }

    /// Guarded register read
    ///
    /// # Errors
    ///
    /// Returns the access guard's rejection or the backend's error.
    pub fn read_register(&self, bar: u32, offset: u32) -> Result<u32> {
        self.shared().stats.record_control();
        self.shared().banks.read_register(bar, offset)
    }

    /// Guarded read of `count` consecutive registers
    ///
    /// # Errors
    ///
    /// Fails on the first rejected or failing register.
    pub fn read_register_range(&self, bar: u32, offset: u32, count: u32) -> Result<Vec<u32>> {
        self.shared().stats.record_control();
        self.shared().banks.read_register_range(bar, offset, count)
    }

    /// Guarded register write
    ///
    /// # Errors
    ///
    /// Returns the access guard's rejection or the backend's error.
    pub fn write_register(&self, bar: u32, offset: u32, value: u32) -> Result<()> {
        self.shared().stats.record_control();
        self.shared().banks.write_register(bar, offset, value)
    }

    /// Guarded `(old & !clear) | set`; returns the new value
    ///
    /// # Errors
    ///
    /// Returns the access guard's rejection or the backend's error.
    pub fn modify_register(&self, bar: u32, offset: u32, clear: u32, set: u32) -> Result<u32> {
        self.shared().stats.record_control();
        self.shared().banks.modify_register(bar, offset, clear, set)
    }

    /// Guarded register mode change
    ///
    /// # Errors
    ///
    /// Returns the access guard's rejection or the backend's error.
    pub fn set_register_mode(&self, bar: u32, offset: u32, mode: u32) -> Result<()> {
        self.shared().stats.record_control();
        self.shared().banks.set_register_mode(bar, offset, mode)
    }

    /// Discard every DMA request (simulator only); returns how many
    ///
    /// # Errors
    ///
    /// Returns `NotSimulator` on hardware.
    pub fn reset_dma(&self) -> Result<usize> {
        self.device.require_simulator("reset_dma")?;
        self.shared().stats.record_control();
        Ok(self.shared().dma.reset())
    }

    /// Raise a simulated interrupt
    ///
    /// # Errors
    ///
    /// See [`FpgaDevice::simulate_irq`].
    pub fn simulate_irq(&self, source: u32) -> Result<IrqOutcome> {
        self.shared().stats.record_control();
        self.device.simulate_irq(source)
    }

    /// Register a simulator memory window of `size` bytes owned by this session
    ///
    /// # Errors
    ///
    /// `NotSimulator` on hardware, `InvalidArgument` for a zero size.
    pub fn setup_simulator_memory(&self, size: usize) -> Result<()> {
        self.device.require_simulator("setup_simulator_memory")?;
        self.shared().stats.record_control();
        self.shared().sim_memory.setup(self.id(), size)
    }

    /// Copy between `buffer` and the simulator memory window at `offset`
    ///
    /// # Errors
    ///
    /// `NotSimulator`, `NotOwner` or `OutOfRange`.
    pub fn simulate_dma_transfer(
        &self,
        direction: Direction,
        offset: usize,
        buffer: &mut [u8],
    ) -> Result<()> {
        self.device.require_simulator("simulate_dma_transfer")?;
        self.shared().stats.record_control();
        self.shared()
            .sim_memory
            .transfer(self.id(), direction, offset, buffer)
    }

    /// Close the session
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let id = self.id();
        let shared = self.device.shared.as_ref();
        shared.registry.unregister(id);
        let discarded = self.subscriber.clear();
        shared.sim_memory.release(id);
        shared.stats.record_release();
        tracing::info!("Session {id} closed ({discarded} pending events discarded)");
    }
}

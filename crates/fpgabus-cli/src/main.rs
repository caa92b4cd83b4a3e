// SPDX-License-Identifier: AGPL-3.0-only

//! `fpgabus` — command-line interface for the FPGA board driver.
//!
//! ```text
//! USAGE:
//!   fpgabus info                            Device, BAR and DMA summary
//!   fpgabus read <bar> <offset> [-n N]      Read N registers
//!   fpgabus write <bar> <offset> <value>    Write one register
//!   fpgabus modify <bar> <offset> --clear C --set S
//!   fpgabus dma [--transfers N] [--len L]   Run DMA transfers
//!   fpgabus irq <source>                    Raise a simulated interrupt
//!   fpgabus stats                           Transfer counters
//! ```
//!
//! Without `--pcie` or `--membus` the in-process simulator is used, so
//! every invocation starts from a fresh register file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fpgabus_driver::{
    event_type, AccessMode, Direction, DriverConfig, FpgaDevice, IrqOutcome, Session,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fpgabus", about = "FPGA board driver CLI", version)]
struct Cli {
    /// PCIe address of the board (e.g. 0000:03:00.0); selects PCIe mode.
    #[arg(long, global = true, conflicts_with = "membus")]
    pcie: Option<String>,
    /// Physical base address of chip select 0; selects memory-bus mode.
    #[arg(long, global = true, value_parser = parse_u64)]
    membus: Option<u64>,
    /// Use the FVD register layout (DMA on BAR3). Requires --pcie.
    #[arg(long, global = true, requires = "pcie")]
    fvd: bool,
    /// First interrupt number of the board's MSI block.
    #[arg(long, global = true, default_value_t = 1)]
    irq_base: u32,
    /// DMA completion timeout in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print device, BAR and DMA scheduler information.
    Info,
    /// Read one or more consecutive registers.
    Read {
        /// BAR index (0-5).
        bar: u32,
        /// Byte offset (hex with 0x prefix accepted).
        #[arg(value_parser = parse_u32)]
        offset: u32,
        /// Number of registers.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Write one register.
    Write {
        /// BAR index (0-5).
        bar: u32,
        /// Byte offset.
        #[arg(value_parser = parse_u32)]
        offset: u32,
        /// Value to write.
        #[arg(value_parser = parse_u32)]
        value: u32,
    },
    /// Clear then set bits in one register.
    Modify {
        /// BAR index (0-5).
        bar: u32,
        /// Byte offset.
        #[arg(value_parser = parse_u32)]
        offset: u32,
        /// Bits to clear.
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        clear: u32,
        /// Bits to set.
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        set: u32,
    },
    /// Run DMA transfers and report their completion times.
    Dma {
        /// Number of transfers.
        #[arg(long, default_value_t = 4)]
        transfers: u32,
        /// Bytes per transfer.
        #[arg(long, default_value_t = 4096)]
        len: u32,
        /// Transfer direction.
        #[arg(long, value_enum, default_value_t = Dir::Down)]
        direction: Dir,
        /// System-side bus address.
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        system: u32,
        /// Device-side address.
        #[arg(long, value_parser = parse_u32, default_value = "0")]
        device: u32,
    },
    /// Raise a simulated interrupt for an event source bit mask.
    Irq {
        /// Source bit (e.g. 0x1 for DMA channel 0).
        #[arg(value_parser = parse_u32)]
        source: u32,
    },
    /// Print transfer statistics after an optional DMA run.
    Stats {
        /// Transfers to run first (simulator only).
        #[arg(long, default_value_t = 0)]
        transfers: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Dir {
    /// System to device.
    Down,
    /// Device to system.
    Up,
}

impl From<Dir> for Direction {
    fn from(d: Dir) -> Self {
        match d {
            Dir::Down => Direction::Down,
            Dir::Up => Direction::Up,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let device = FpgaDevice::new(config_from(&cli)).context("opening device")?;

    match cli.command {
        Cmd::Info => cmd_info(&device),
        Cmd::Read { bar, offset, count } => cmd_read(&device, bar, offset, count)?,
        Cmd::Write { bar, offset, value } => {
            device.open().write_register(bar, offset, value)?;
            println!("BAR{bar}[{offset:#06x}] <- {value:#010x}");
        }
        Cmd::Modify {
            bar,
            offset,
            clear,
            set,
        } => {
            let value = device.open().modify_register(bar, offset, clear, set)?;
            println!("BAR{bar}[{offset:#06x}] = {value:#010x}");
        }
        Cmd::Dma {
            transfers,
            len,
            direction,
            system,
            device: dev_addr,
        } => cmd_dma(&device, transfers, len, direction.into(), system, dev_addr)?,
        Cmd::Irq { source } => cmd_irq(&device, source)?,
        Cmd::Stats { transfers } => {
            device.set_stats_enabled(true);
            if transfers > 0 {
                cmd_dma(&device, transfers, 4096, Direction::Down, 0, 0)?;
            }
            println!("{}", device.stats());
        }
    }

    Ok(())
}

fn config_from(cli: &Cli) -> DriverConfig {
    let mut config = if let Some(addr) = &cli.pcie {
        let mut config = DriverConfig::pcie(addr.clone(), cli.irq_base);
        if cli.fvd {
            config.mode = AccessMode::Fvd;
        }
        config
    } else if let Some(base) = cli.membus {
        DriverConfig {
            mode: AccessMode::MemBus,
            membus_base: Some(base),
            irq_base: cli.irq_base,
            ..DriverConfig::simulator()
        }
    } else {
        DriverConfig::simulator()
    };
    if let Some(ms) = cli.timeout_ms {
        config = config.with_dma_timeout_ms(ms);
    }
    config
}

fn cmd_info(device: &FpgaDevice) {
    println!("{}", device.info());
    println!();
    for bar in 0..6 {
        let Some(bank) = device.banks().bank(bar) else {
            continue;
        };
        match bank.backend_type() {
            Some(backend) => println!("BAR{bar}  {:>6} bytes  {backend}", bank.size()),
            None => println!("BAR{bar}  (disabled)"),
        }
    }
    println!();
    println!("{}", device.dma_status());
}

fn cmd_read(device: &FpgaDevice, bar: u32, offset: u32, count: u32) -> Result<()> {
    let values = device.open().read_register_range(bar, offset, count)?;
    for (i, value) in (0u32..).zip(values) {
        println!("BAR{bar}[{:#06x}] = {value:#010x}", offset + i * 4);
    }
    Ok(())
}

fn cmd_dma(
    device: &FpgaDevice,
    transfers: u32,
    len: u32,
    direction: Direction,
    system: u32,
    dev_addr: u32,
) -> Result<()> {
    let session = device.open();
    session.set_event_mask(event_type::TYPE_DMA_DONE);
    let simulated = device.config().mode.is_simulator();

    for i in 0..transfers {
        let offset = i.wrapping_mul(len);
        let handle = session.submit_transfer_async(
            direction,
            system.wrapping_add(offset),
            dev_addr.wrapping_add(offset),
            len,
        )?;
        if simulated {
            // No hardware to raise the completion; do it ourselves
            complete_simulated(&session)?;
        }
        let elapsed = handle.wait(device.config().dma_timeout())?;
        println!(
            "ticket {:>6}  {direction}  {len} bytes  {:.1} µs",
            handle.ticket(),
            elapsed.as_secs_f64() * 1e6
        );
    }

    device.flush_events();
    let mut done = 0;
    while session.dequeue_event().is_some() {
        done += 1;
    }
    println!("{done} dma-done event(s) delivered");
    Ok(())
}

fn complete_simulated(session: &Session) -> Result<()> {
    match session.simulate_irq(1)? {
        IrqOutcome::DmaDone(_) => Ok(()),
        other => anyhow::bail!("unexpected interrupt outcome: {other:?}"),
    }
}

fn cmd_irq(device: &FpgaDevice, source: u32) -> Result<()> {
    let session = device.open();
    session.set_event_mask(event_type::TYPE_ALL);
    session.set_irq_forwarding_mask(u32::MAX);
    let outcome = session.simulate_irq(source)?;
    println!("{outcome:?}");
    device.flush_events();
    while let Some(event) = session.dequeue_event() {
        println!("  {event}");
    }
    Ok(())
}

fn parse_u32(s: &str) -> Result<u32, String> {
    parse_u64(s).and_then(|v| u32::try_from(v).map_err(|e| e.to_string()))
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s:?}: {e}"))
}

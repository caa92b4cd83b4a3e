// SPDX-License-Identifier: AGPL-3.0-only

//! Hardware kick-off of a transfer on one channel

use super::TransferDescriptor;
use crate::bank::RegisterBank;
use crate::error::Result;
use fpgabus_chip::regs::dma;
use std::fmt::Debug;
use std::sync::Arc;

/// Starts a transfer on a channel; fire-and-forget
///
/// Called by the scheduler with no scheduler lock held.
pub trait TransferEngine: Debug + Send + Sync {
    /// Program and start `descriptor` on `channel`
    ///
    /// # Errors
    ///
    /// Returns error if the descriptor registers cannot be written.
    fn start(&self, channel: usize, descriptor: &TransferDescriptor) -> Result<()>;
}

/// Engine that programs the DMA register block of a bank
#[derive(Debug, Clone)]
pub struct BankTransferEngine {
    bank: Arc<RegisterBank>,
}

impl BankTransferEngine {
    /// Engine driving the DMA registers of `bank`
    pub const fn new(bank: Arc<RegisterBank>) -> Self {
        Self { bank }
    }
}

impl TransferEngine for BankTransferEngine {
    fn start(&self, channel: usize, descriptor: &TransferDescriptor) -> Result<()> {
        let channel = u32::try_from(channel).unwrap_or(u32::MAX);
        tracing::debug!(
            "DMA ch{channel}: {:#x} -> {:#x}, {} bytes {}",
            descriptor.src,
            descriptor.dst,
            descriptor.len,
            descriptor.direction
        );
        // START last: the engine latches the other registers on it
        self.bank.write_sequence(&[
            (dma::CHAN, channel),
            (dma::SRC_ADDR, descriptor.src),
            (dma::DEST_ADDR, descriptor.dst),
            (dma::DIR_UP_STRM, descriptor.direction.register_value()),
            (dma::LEN_BYTES, descriptor.len),
            (dma::START, 1),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBank;
    use crate::dma::Direction;
    use crate::event::{Event, EventPayload, EventSink};
    use fpgabus_chip::regs::mode;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl EventSink for Recorder {
        fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn programs_descriptor_then_start() {
        let recorder = Arc::new(Recorder::default());
        let mut sim = SimulatedBank::new(0, 512, recorder.clone());
        for reg in [dma::CHAN, dma::SRC_ADDR, dma::DEST_ADDR, dma::DIR_UP_STRM, dma::LEN_BYTES, dma::START] {
            crate::backend::RegisterBackend::set_mode(&mut sim, reg, mode::DEFAULT | mode::WRITE_EVENT)
                .unwrap();
        }
        let bank = Arc::new(RegisterBank::new(0, Some(Box::new(sim))));
        let engine = BankTransferEngine::new(Arc::clone(&bank));

        let d = TransferDescriptor::between(Direction::Up, 0x1000, 0x8000, 256);
        engine.start(0, &d).unwrap();

        let offsets: Vec<u32> = recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e.payload() {
                EventPayload::RegisterWrite(a) => a.offset,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            offsets,
            [dma::CHAN, dma::SRC_ADDR, dma::DEST_ADDR, dma::DIR_UP_STRM, dma::LEN_BYTES, dma::START]
        );
        assert_eq!(bank.read(dma::SRC_ADDR).unwrap(), 0x8000);
        assert_eq!(bank.read(dma::DIR_UP_STRM).unwrap(), 1);
    }
}

//! OPN family tracker (YM2612, YM2608 FM part)
//!
//! Register layout, per port (port 1 addresses channels 3..5):
//! - 0x28 (port 0 only): key on/off, bits 0-2 channel code (0,1,2,4,5,6),
//!   bits 4-7 operator mask
//! - 0x30..0x9F: operator registers, `reg & 3` channel (3 unused),
//!   `(reg >> 2) & 3` slot in OP1, OP3, OP2, OP4 order
//! - 0xB0..0xB2: feedback / algorithm
//! - 0xB4..0xB6: L/R, AMS, FMS
//!
//! The register shadow is not reset when a capture is flushed. A real chip
//! keeps its registers across key-ons, so a trace that only rewrites the
//! parameters that change still yields complete instruments.

use super::{ChipFamily, ChipTracker, KeyLatch, SharedSink};
use crate::instrument::{Instrument, Operator, AMS_MAX, FMS_MAX, OPERATOR_COUNT};

const CHANNELS: usize = 6;

const KEY_REG: u8 = 0x28;

/// Base addresses of the seven operator register groups
const OPERATOR_GROUPS: [u8; 7] = [0x30, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90];

/// Register shadow and key tracking for one OPN chip
pub struct OpnTracker {
    family: ChipFamily,
    regs: [[u8; 256]; 2],
    keys: KeyLatch<CHANNELS>,
    sink: SharedSink,
}

impl OpnTracker {
    /// Tracker for a YM2612 trace
    pub fn ym2612(sink: SharedSink) -> Self {
        Self::new(ChipFamily::Ym2612, sink)
    }

    /// Tracker for the FM part of a YM2608 trace
    pub fn ym2608(sink: SharedSink) -> Self {
        Self::new(ChipFamily::Ym2608, sink)
    }

    fn new(family: ChipFamily, sink: SharedSink) -> Self {
        OpnTracker {
            family,
            regs: [[0; 256]; 2],
            keys: KeyLatch::new(),
            sink,
        }
    }

    /// Decode the current register state of `channel` into an instrument
    pub fn snapshot(&self, channel: usize) -> Instrument {
        let regs = &self.regs[channel / 3];
        let offset = (channel % 3) as u8;

        let mut ins = Instrument::default();
        for slot in 0..OPERATOR_COUNT as u8 {
            let base = offset + slot * 4;
            let values = OPERATOR_GROUPS.map(|group| regs[(group + base) as usize]);
            ins.operators[slot as usize] = Operator::from_opn_registers(values);
        }

        let fb_alg = regs[(0xB0 + offset) as usize];
        ins.feedback = (fb_alg >> 3) & 0x07;
        ins.algorithm = fb_alg & 0x07;

        let lr_ams_fms = regs[(0xB4 + offset) as usize];
        ins.am_sensitivity = (lr_ams_fms >> 4) & AMS_MAX;
        ins.fm_sensitivity = lr_ams_fms & FMS_MAX;
        ins
    }

    fn key_event(&mut self, value: u8) {
        let channel = match value & 0x07 {
            code @ 0..=2 => code as usize,
            code @ 4..=6 => code as usize - 1,
            _ => return,
        };
        if self.keys.update(channel, value >> 4) {
            let snapshot = self.snapshot(channel);
            self.keys.latch(&self.sink, self.family, channel, snapshot);
        }
    }
}

impl ChipTracker for OpnTracker {
    fn family(&self) -> ChipFamily {
        self.family
    }

    fn pass_reg(&mut self, port: u8, reg: u8, value: u8) {
        let port = (port & 1) as usize;
        self.regs[port][reg as usize] = value;
        if port == 0 && reg == KEY_REG {
            self.key_event(value);
        }
    }

    fn analyze_epoch(&mut self) {
        self.keys.flush(&self.sink, self.family);
    }
}

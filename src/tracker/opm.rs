//! YM2151 (OPM) tracker
//!
//! Register layout (single port, eight channels):
//! - 0x08: key on/off, bits 0-2 channel, bits 3-6 slot mask (M1, C1, M2, C2)
//! - 0x20..0x27: L/R, feedback, connection
//! - 0x38..0x3F: PMS (bits 4-6), AMS (bits 0-1)
//! - 0x40..0xFF: operator registers, `reg & 7` channel, `(reg >> 3) & 3` slot
//!   in M1, M2, C1, C2 order, which is OP1, OP3, OP2, OP4
//!
//! The operator fields share their bit positions with OPN, so decoding goes
//! through [`Operator::from_opn_registers`]. DT2 is dropped and OPM has no
//! SSG-EG.
//!
//! The register shadow is not reset when a capture is flushed. A real chip
//! keeps its registers across key-ons, so a trace that only rewrites the
//! parameters that change still yields complete instruments.

use super::{ChipFamily, ChipTracker, KeyLatch, SharedSink};
use crate::instrument::{Instrument, Operator, AMS_MAX, FMS_MAX, OPERATOR_COUNT};

const CHANNELS: usize = 8;

const KEY_REG: u8 = 0x08;

/// Register shadow and key tracking for one YM2151
pub struct Ym2151Tracker {
    regs: [u8; 256],
    keys: KeyLatch<CHANNELS>,
    sink: SharedSink,
}

impl Ym2151Tracker {
    /// Create a tracker feeding `sink`
    pub fn new(sink: SharedSink) -> Self {
        Ym2151Tracker {
            regs: [0; 256],
            keys: KeyLatch::new(),
            sink,
        }
    }

    /// Decode the current register state of `channel` into an instrument
    pub fn snapshot(&self, channel: usize) -> Instrument {
        let reg = |base: u8, slot: u8| self.regs[(base + slot * 8) as usize + channel];

        let mut ins = Instrument::default();
        for slot in 0..OPERATOR_COUNT as u8 {
            ins.operators[slot as usize] = Operator::from_opn_registers([
                reg(0x40, slot),
                reg(0x60, slot),
                reg(0x80, slot),
                reg(0xA0, slot),
                reg(0xC0, slot) & 0x1F,
                reg(0xE0, slot),
                0,
            ]);
        }

        let rl_fb_con = self.regs[0x20 + channel];
        ins.feedback = (rl_fb_con >> 3) & 0x07;
        ins.algorithm = rl_fb_con & 0x07;

        let pms_ams = self.regs[0x38 + channel];
        ins.fm_sensitivity = (pms_ams >> 4) & FMS_MAX;
        ins.am_sensitivity = pms_ams & AMS_MAX;
        ins
    }
}

impl ChipTracker for Ym2151Tracker {
    fn family(&self) -> ChipFamily {
        ChipFamily::Ym2151
    }

    fn pass_reg(&mut self, _port: u8, reg: u8, value: u8) {
        self.regs[reg as usize] = value;
        if reg == KEY_REG {
            let channel = (value & 0x07) as usize;
            if self.keys.update(channel, (value >> 3) & 0x0F) {
                let snapshot = self.snapshot(channel);
                self.keys
                    .latch(&self.sink, ChipFamily::Ym2151, channel, snapshot);
            }
        }
    }

    fn analyze_epoch(&mut self) {
        self.keys.flush(&self.sink, ChipFamily::Ym2151);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportOptions;
    use crate::tracker::CaptureSink;

    #[test]
    fn test_register_program_round_trip() {
        let sink = CaptureSink::shared(ImportOptions::default());
        let mut tracker = Ym2151Tracker::new(sink.clone());
        let ch = 6u8;
        for slot in 0..4u8 {
            let off = ch + slot * 8;
            tracker.pass_reg(0, 0x40 + off, 0x20 | (slot + 2)); // DT1 2, MUL
            tracker.pass_reg(0, 0x60 + off, 0x20 + slot); // TL
            tracker.pass_reg(0, 0x80 + off, 0x40 | 0x1F); // KS 1, AR 31
            tracker.pass_reg(0, 0xA0 + off, 0x80 | slot); // AMS-EN, D1R
            tracker.pass_reg(0, 0xC0 + off, 0xC0 | (0x10 + slot)); // DT2 3 (dropped), D2R
            tracker.pass_reg(0, 0xE0 + off, 0x70 | slot); // D1L 7, RR
        }
        tracker.pass_reg(0, 0x20 + ch, 0xC0 | (6 << 3) | 2); // RL, FB 6, CON 2
        tracker.pass_reg(0, 0x38 + ch, (5 << 4) | 1); // PMS 5, AMS 1
        tracker.pass_reg(0, 0x08, (0x0F << 3) | ch);
        tracker.finish();

        let sink = sink.borrow();
        assert_eq!(sink.instruments().len(), 1);
        let ins = &sink.instruments()[0];
        assert_eq!(ins.name(), "Ins 1 ch6");
        assert_eq!(ins.feedback, 6);
        assert_eq!(ins.algorithm, 2);
        assert_eq!(ins.fm_sensitivity, 5);
        assert_eq!(ins.am_sensitivity, 1);
        for (slot, op) in ins.operators.iter().enumerate() {
            let slot = slot as u8;
            assert_eq!(op.detune, 2);
            assert_eq!(op.fmult, slot + 2);
            assert_eq!(op.level, 0x20 + slot);
            assert_eq!(op.ratescale, 1);
            assert_eq!(op.attack, 31);
            assert!(op.am_enable);
            assert_eq!(op.decay1, slot);
            assert_eq!(op.decay2, 0x10 + slot);
            assert_eq!(op.sustain, 7);
            assert_eq!(op.release, slot);
            assert_eq!(op.ssg_eg, 0);
        }
    }

    #[test]
    fn test_key_edges_per_channel() {
        let sink = CaptureSink::shared(ImportOptions::default());
        let mut tracker = Ym2151Tracker::new(sink.clone());
        tracker.pass_reg(0, 0x08, 0x78 | 3); // ch3 on
        tracker.pass_reg(0, 0x08, 0x78 | 1); // ch1 on
        tracker.pass_reg(0, 0x08, 0x08 | 3); // ch3 still on (M1 only)
        tracker.analyze_epoch();
        tracker.pass_reg(0, 0x08, 3); // ch3 off
        tracker.pass_reg(0, 0x08, 0x40 | 3); // ch3 on (C2)
        tracker.finish();

        let names: Vec<String> = sink
            .borrow()
            .instruments()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        assert_eq!(names, vec!["Ins 1 ch1", "Ins 2 ch3", "Ins 3 ch3"]);
    }
}

//! Experimental FM software synthesizer (non-bit-accurate)
//!
//! Interprets the YM2612 register map well enough to audition patches: six
//! channels, four sine operators each, the eight OPN algorithms, operator 1
//! feedback and a dB-domain envelope. It is intentionally not a chip
//! emulation: rates, detune, SSG-EG and the LFO are approximated or ignored.

use super::FmChip;
use super::generator::OPN2_CLOCK_HZ;
use std::f32::consts::TAU;

const CHANNELS: usize = 6;
const SLOTS: usize = 4;

/// Attenuation at which an envelope is considered silent
const SILENT_DB: f32 = 96.0;

/// Output gain per carrier before clipping to i16
const CARRIER_GAIN: f32 = 4096.0;

// Register slot order is OP1, OP3, OP2, OP4
const OP1: usize = 0;
const OP3: usize = 1;
const OP2: usize = 2;
const OP4: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvPhase {
    Attack,
    Decay,
    Sustain,
    Release,
    Off,
}

#[derive(Debug, Clone, Copy)]
struct SoftOperator {
    dt_mul: u8,
    tl: u8,
    ar: u8,
    d1r: u8,
    d2r: u8,
    d1l: u8,
    rr: u8,
    phase: f32,
    env_db: f32,
    env: EnvPhase,
}

impl SoftOperator {
    fn new() -> Self {
        SoftOperator {
            dt_mul: 0,
            tl: 0x7F,
            ar: 0,
            d1r: 0,
            d2r: 0,
            d1l: 0,
            rr: 0,
            phase: 0.0,
            env_db: SILENT_DB,
            env: EnvPhase::Off,
        }
    }

    fn multiplier(&self) -> f32 {
        match self.dt_mul & 0x0F {
            0 => 0.5,
            m => m as f32,
        }
    }

    /// dB per sample for a 6-bit effective rate
    fn rate_step(rate: u8) -> f32 {
        if rate == 0 {
            0.0
        } else {
            0.0005 * 2f32.powf(rate as f32 / 4.0)
        }
    }

    fn key_on(&mut self) {
        if self.env == EnvPhase::Off || self.env == EnvPhase::Release {
            self.phase = 0.0;
            self.env = EnvPhase::Attack;
        }
    }

    fn key_off(&mut self) {
        if self.env != EnvPhase::Off {
            self.env = EnvPhase::Release;
        }
    }

    fn advance_envelope(&mut self) {
        match self.env {
            EnvPhase::Attack => {
                if self.ar >= 31 {
                    self.env_db = 0.0;
                } else {
                    let step = Self::rate_step(self.ar * 2);
                    self.env_db -= step * (self.env_db / 8.0 + 1.0);
                }
                if self.env_db <= 0.0 {
                    self.env_db = 0.0;
                    self.env = EnvPhase::Decay;
                }
            }
            EnvPhase::Decay => {
                let sustain_db = if self.d1l >= 15 {
                    SILENT_DB
                } else {
                    self.d1l as f32 * 3.0
                };
                self.env_db += Self::rate_step(self.d1r * 2);
                if self.env_db >= sustain_db {
                    self.env_db = sustain_db;
                    self.env = EnvPhase::Sustain;
                }
            }
            EnvPhase::Sustain => {
                self.env_db += Self::rate_step(self.d2r * 2);
            }
            EnvPhase::Release => {
                self.env_db += Self::rate_step(self.rr * 4 + 2);
            }
            EnvPhase::Off => {}
        }
        if self.env_db >= SILENT_DB && self.env != EnvPhase::Attack {
            self.env_db = SILENT_DB;
            self.env = EnvPhase::Off;
        }
    }

    fn amplitude(&self) -> f32 {
        if self.env == EnvPhase::Off {
            return 0.0;
        }
        let db = self.env_db + (self.tl & 0x7F) as f32 * 0.75;
        10f32.powf(-db / 20.0)
    }

    /// One output sample; `modulation` is in cycles
    fn tick(&mut self, increment: f32, modulation: f32) -> f32 {
        self.advance_envelope();
        let out = (TAU * (self.phase + modulation)).sin() * self.amplitude();
        self.phase = (self.phase + increment * self.multiplier()).fract();
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct SoftChannel {
    ops: [SoftOperator; SLOTS],
    fnum: u16,
    block: u8,
    latch: u8,
    feedback: u8,
    algorithm: u8,
    fb_history: [f32; 2],
}

impl SoftChannel {
    fn new() -> Self {
        SoftChannel {
            ops: [SoftOperator::new(); SLOTS],
            fnum: 0,
            block: 0,
            latch: 0,
            feedback: 0,
            algorithm: 0,
            fb_history: [0.0; 2],
        }
    }

    fn is_silent(&self) -> bool {
        self.ops.iter().all(|op| op.env == EnvPhase::Off)
    }

    fn render(&mut self, chip_rate: f32, sample_rate: f32) -> f32 {
        if self.is_silent() {
            return 0.0;
        }
        let freq = self.fnum as f32 * chip_rate * 2f32.powi(self.block as i32 - 1) / 1_048_576.0;
        let inc = freq / sample_rate;

        let fb = if self.feedback == 0 {
            0.0
        } else {
            (self.fb_history[0] + self.fb_history[1]) * 0.5 * 2f32.powi(self.feedback as i32 - 6)
        };
        let o1 = self.ops[OP1].tick(inc, fb);
        self.fb_history = [self.fb_history[1], o1];

        let ops = &mut self.ops;
        match self.algorithm & 0x07 {
            0 => {
                let o2 = ops[OP2].tick(inc, o1);
                let o3 = ops[OP3].tick(inc, o2);
                ops[OP4].tick(inc, o3)
            }
            1 => {
                let o2 = ops[OP2].tick(inc, 0.0);
                let o3 = ops[OP3].tick(inc, o1 + o2);
                ops[OP4].tick(inc, o3)
            }
            2 => {
                let o2 = ops[OP2].tick(inc, 0.0);
                let o3 = ops[OP3].tick(inc, o2);
                ops[OP4].tick(inc, o1 + o3)
            }
            3 => {
                let o2 = ops[OP2].tick(inc, o1);
                let o3 = ops[OP3].tick(inc, 0.0);
                ops[OP4].tick(inc, o2 + o3)
            }
            4 => {
                let o2 = ops[OP2].tick(inc, o1);
                let o3 = ops[OP3].tick(inc, 0.0);
                o2 + ops[OP4].tick(inc, o3)
            }
            5 => {
                ops[OP2].tick(inc, o1) + ops[OP3].tick(inc, o1) + ops[OP4].tick(inc, o1)
            }
            6 => {
                ops[OP2].tick(inc, o1) + ops[OP3].tick(inc, 0.0) + ops[OP4].tick(inc, 0.0)
            }
            _ => {
                o1 + ops[OP2].tick(inc, 0.0) + ops[OP3].tick(inc, 0.0) + ops[OP4].tick(inc, 0.0)
            }
        }
    }
}

/// Experimental OPN2-flavoured FM backend
pub struct SoftFm {
    channels: [SoftChannel; CHANNELS],
    sample_rate: f32,
    chip_rate: f32,
}

impl SoftFm {
    /// Create a softsynth rendering at `sample_rate`
    pub fn new(sample_rate: u32) -> Self {
        SoftFm {
            channels: [SoftChannel::new(); CHANNELS],
            sample_rate: sample_rate.max(1) as f32,
            chip_rate: (OPN2_CLOCK_HZ / 144.0) as f32,
        }
    }

    fn key_event(&mut self, value: u8) {
        let code = value & 0x07;
        if code & 0x03 == 0x03 {
            return;
        }
        let channel = (code & 0x03) as usize + if code & 0x04 != 0 { 3 } else { 0 };
        // Key bits 4..7 address OP1, OP2, OP3, OP4
        for (bit, slot) in [OP1, OP2, OP3, OP4].into_iter().enumerate() {
            let op = &mut self.channels[channel].ops[slot];
            if value & (0x10 << bit) != 0 {
                op.key_on();
            } else {
                op.key_off();
            }
        }
    }
}

impl FmChip for SoftFm {
    fn name(&self) -> &'static str {
        "SoftFM (experimental)"
    }

    fn reset(&mut self) {
        self.channels = [SoftChannel::new(); CHANNELS];
    }

    fn write_reg(&mut self, port: u8, reg: u8, value: u8) {
        if port == 0 && reg == 0x28 {
            self.key_event(value);
            return;
        }
        let offset = (reg & 0x03) as usize;
        if offset == 3 || reg < 0x30 {
            return;
        }
        let channel = offset + 3 * (port & 1) as usize;
        let ch = &mut self.channels[channel];
        match reg & 0xF0 {
            0x30..=0x90 => {
                let op = &mut ch.ops[((reg >> 2) & 0x03) as usize];
                match reg & 0xF0 {
                    0x30 => op.dt_mul = value,
                    0x40 => op.tl = value & 0x7F,
                    0x50 => op.ar = value & 0x1F,
                    0x60 => op.d1r = value & 0x1F,
                    0x70 => op.d2r = value & 0x1F,
                    0x80 => {
                        op.d1l = value >> 4;
                        op.rr = value & 0x0F;
                    }
                    _ => {}
                }
            }
            0xA0 => match reg & 0x0C {
                0x00 => {
                    ch.fnum = ((ch.latch as u16 & 0x07) << 8) | value as u16;
                    ch.block = (ch.latch >> 3) & 0x07;
                }
                0x04 => ch.latch = value,
                _ => {}
            },
            0xB0 if reg & 0x0C == 0x00 => {
                ch.feedback = (value >> 3) & 0x07;
                ch.algorithm = value & 0x07;
            }
            _ => {}
        }
    }

    fn generate(&mut self, frames: &mut [i16]) {
        for frame in frames.chunks_exact_mut(2) {
            let mut mix = 0.0f32;
            for ch in &mut self.channels {
                mix += ch.render(self.chip_rate, self.sample_rate);
            }
            let sample = (mix * CARRIER_GAIN).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            frame[0] = sample;
            frame[1] = sample;
        }
    }
}

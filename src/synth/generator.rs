//! Register-level synthesizer over an FM chip backend
//!
//! Turns note, chord and patch requests into YM2612 register writes on a
//! six-channel OPN2 register map. The chip itself is an opaque [`FmChip`]
//! created through a factory so the backend can be swapped at runtime.

use super::{ChipType, ChordType, DebugInfo, FmChip, NullChip, Synthesizer};
use crate::instrument::{Instrument, LEVEL_MAX, OPERATOR_COUNT};

/// OPN2 master clock on NTSC Mega Drive hardware
pub const OPN2_CLOCK_HZ: f64 = 7_670_454.0;

/// Number of FM channels driven by the generator
pub const CHANNEL_COUNT: usize = 6;

/// Base addresses of the per-operator register groups
const OPERATOR_REGISTER_BASES: [u8; 7] = [0x30, 0x40, 0x50, 0x60, 0x70, 0x80, 0x90];

/// Creates a chip backend for a [`ChipType`] at the given sample rate
pub type ChipFactory = Box<dyn Fn(ChipType, u32) -> Box<dyn FmChip> + Send>;

/// OPN2 frequency register pair for a note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FNumber {
    /// Octave block (0..7)
    pub block: u8,
    /// 11-bit frequency number
    pub fnum: u16,
}

impl FNumber {
    /// Frequency of a MIDI note in Hz (A4 = 69 = 440 Hz)
    pub fn note_frequency(note: i32) -> f64 {
        440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
    }

    /// Smallest block whose F-number fits in 11 bits
    pub fn from_note(note: i32) -> Self {
        let chip_rate = OPN2_CLOCK_HZ / 144.0;
        let freq = Self::note_frequency(note.clamp(0, 127));
        let mut block = 0u8;
        loop {
            let fnum = freq * (1u32 << 20) as f64 / chip_rate / 2f64.powi(block as i32 - 1);
            if fnum <= 2047.0 || block == 7 {
                return FNumber {
                    block,
                    fnum: fnum.round().min(2047.0) as u16,
                };
            }
            block += 1;
        }
    }
}

/// Register-level OPN2 synthesizer
pub struct Generator {
    chip: Box<dyn FmChip>,
    chip_type: ChipType,
    factory: ChipFactory,
    sample_rate: u32,
    patch: Instrument,
    is_drum: bool,
    /// Patch TL registers were muted by `silence` and must be rewritten
    patch_muted: bool,
    note: i32,
    lfo_enabled: bool,
    lfo_freq: u8,
    keyed: [bool; CHANNEL_COUNT],
}

impl Generator {
    /// Create a generator whose backends come from `factory`
    pub fn new(factory: ChipFactory, chip_type: ChipType, sample_rate: u32) -> Self {
        let chip = factory(chip_type, sample_rate);
        let mut gen = Generator {
            chip,
            chip_type,
            factory,
            sample_rate,
            patch: Instrument::default(),
            is_drum: false,
            patch_muted: false,
            note: 60,
            lfo_enabled: false,
            lfo_freq: 0,
            keyed: [false; CHANNEL_COUNT],
        };
        gen.program_chip();
        gen
    }

    /// Generator over a silent [`NullChip`]
    pub fn with_null_chip(sample_rate: u32) -> Self {
        Self::new(
            Box::new(|_: ChipType, _: u32| Box::new(NullChip::new()) as Box<dyn FmChip>),
            ChipType::default(),
            sample_rate,
        )
    }

    /// Generator over the experimental FM softsynth
    #[cfg(feature = "softsynth")]
    pub fn with_softsynth(chip_type: ChipType, sample_rate: u32) -> Self {
        Self::new(
            Box::new(|_: ChipType, rate: u32| {
                Box::new(super::softsynth::SoftFm::new(rate)) as Box<dyn FmChip>
            }),
            chip_type,
            sample_rate,
        )
    }

    /// Currently loaded patch
    pub fn patch(&self) -> &Instrument {
        &self.patch
    }

    /// Selected backend
    pub fn chip_type(&self) -> ChipType {
        self.chip_type
    }

    /// Output sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Access the backend
    pub fn chip(&self) -> &dyn FmChip {
        self.chip.as_ref()
    }

    fn channel_address(channel: usize) -> (u8, u8) {
        ((channel / 3) as u8, (channel % 3) as u8)
    }

    fn key_code(channel: usize) -> u8 {
        let (port, offset) = Self::channel_address(channel);
        (port << 2) | offset
    }

    fn write_channel(&mut self, channel: usize, base: u8, value: u8) {
        let (port, offset) = Self::channel_address(channel);
        self.chip.write_reg(port, base + offset, value);
    }

    fn key(&mut self, channel: usize, on: bool) {
        let mask = if on { 0xF0 } else { 0x00 };
        self.chip.write_reg(0, 0x28, mask | Self::key_code(channel));
        self.keyed[channel] = on;
    }

    fn write_patch(&mut self, channel: usize) {
        let (port, offset) = Self::channel_address(channel);
        let patch = self.patch;
        for slot in 0..OPERATOR_COUNT {
            let regs = patch.operators[slot].to_opn_registers();
            for (base, value) in OPERATOR_REGISTER_BASES.iter().zip(regs) {
                self.chip
                    .write_reg(port, base + (slot as u8) * 4 + offset, value);
            }
        }
        self.chip.write_reg(port, 0xB0 + offset, patch.fb_alg_register());
        self.chip
            .write_reg(port, 0xB4 + offset, patch.lr_ams_fms_register());
    }

    fn write_lfo(&mut self) {
        let value = ((self.lfo_enabled as u8) << 3) | (self.lfo_freq & 0x07);
        self.chip.write_reg(0, 0x22, value);
    }

    fn program_chip(&mut self) {
        self.chip.reset();
        self.write_lfo();
        for channel in 0..CHANNEL_COUNT {
            self.key(channel, false);
            self.write_patch(channel);
        }
        self.patch_muted = false;
    }

    fn restore_patch_if_muted(&mut self) {
        if self.patch_muted {
            for channel in 0..CHANNEL_COUNT {
                self.write_patch(channel);
            }
            self.patch_muted = false;
        }
    }

    fn sounding_note(&self, note: i32) -> i32 {
        let base = if self.is_drum {
            self.patch.perc_note_num as i32
        } else {
            note
        };
        (base + self.patch.note_offset as i32).clamp(0, 127)
    }

    fn start_channel(&mut self, channel: usize, note: i32) {
        let FNumber { block, fnum } = FNumber::from_note(self.sounding_note(note));
        self.key(channel, false);
        // Block/high bits latch on the low write, so 0xA4 goes first
        self.write_channel(channel, 0xA4, (block << 3) | ((fnum >> 8) as u8 & 0x07));
        self.write_channel(channel, 0xA0, (fnum & 0xFF) as u8);
        self.key(channel, true);
    }

    fn all_keys_off(&mut self) {
        for channel in 0..CHANNEL_COUNT {
            self.key(channel, false);
        }
    }
}

impl Synthesizer for Generator {
    fn change_note(&mut self, note: i32) {
        self.note = note;
    }

    fn play_note(&mut self) {
        self.restore_patch_if_muted();
        self.start_channel(0, self.note);
    }

    fn stop_note(&mut self) {
        for channel in 0..CHANNEL_COUNT {
            if self.keyed[channel] {
                self.key(channel, false);
            }
        }
    }

    fn play_chord(&mut self, chord: ChordType) {
        self.restore_patch_if_muted();
        self.all_keys_off();
        let root = self.note;
        for (channel, interval) in chord.intervals().iter().enumerate() {
            self.start_channel(channel, root + interval);
        }
    }

    fn change_patch(&mut self, instrument: &Instrument, is_drum: bool) {
        self.patch = *instrument;
        self.patch.clamp();
        self.is_drum = is_drum;
        self.all_keys_off();
        for channel in 0..CHANNEL_COUNT {
            self.write_patch(channel);
        }
        self.patch_muted = false;
    }

    fn change_lfo(&mut self, enabled: bool) {
        self.lfo_enabled = enabled;
        self.write_lfo();
    }

    fn change_lfo_freq(&mut self, freq: i32) {
        self.lfo_freq = freq.clamp(0, 7) as u8;
        self.write_lfo();
    }

    fn silence(&mut self) {
        self.all_keys_off();
        for channel in 0..CHANNEL_COUNT {
            let (port, offset) = Self::channel_address(channel);
            for slot in 0..OPERATOR_COUNT as u8 {
                self.chip.write_reg(port, 0x40 + slot * 4 + offset, LEVEL_MAX);
            }
        }
        self.patch_muted = true;
    }

    fn note_off_all_chans(&mut self) {
        self.all_keys_off();
    }

    fn generate(&mut self, frames: &mut [i16], frame_count: usize) {
        let len = (frame_count * 2).min(frames.len());
        self.chip.generate(&mut frames[..len]);
    }

    fn switch_chip(&mut self, chip: ChipType) {
        self.chip = (self.factory)(chip, self.sample_rate);
        self.chip_type = chip;
        self.program_chip();
    }

    fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            chip_name: self.chip.name(),
            channels_playing: self.keyed.iter().filter(|&&k| k).count() as u32,
            note: self.note,
            lfo_enabled: self.lfo_enabled,
            lfo_freq: self.lfo_freq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Chip that forwards its writes to a shared register shadow
    struct SharedChip(Arc<Mutex<NullChip>>);

    impl FmChip for SharedChip {
        fn name(&self) -> &'static str {
            "Shared"
        }
        fn reset(&mut self) {
            self.0.lock().reset();
        }
        fn write_reg(&mut self, port: u8, reg: u8, value: u8) {
            self.0.lock().write_reg(port, reg, value);
        }
        fn generate(&mut self, frames: &mut [i16]) {
            frames.fill(1);
        }
    }

    fn shared_generator() -> (Generator, Arc<Mutex<NullChip>>) {
        let shadow = Arc::new(Mutex::new(NullChip::new()));
        let handle = Arc::clone(&shadow);
        let gen = Generator::new(
            Box::new(move |_: ChipType, _: u32| {
                Box::new(SharedChip(Arc::clone(&handle))) as Box<dyn FmChip>
            }),
            ChipType::Ym2612,
            44_100,
        );
        (gen, shadow)
    }

    #[test]
    fn test_note_frequency() {
        assert_relative_eq!(FNumber::note_frequency(69), 440.0);
        assert_relative_eq!(FNumber::note_frequency(57), 220.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fnumber_fits_and_matches_pitch() {
        for note in 0..128 {
            let FNumber { block, fnum } = FNumber::from_note(note);
            assert!(fnum <= 2047, "note {note}");
            assert!(block <= 7);
        }
        // A4 resolves to block 4 on a 7.67 MHz clock
        let a4 = FNumber::from_note(69);
        assert_eq!(a4.block, 4);
        let chip_rate = OPN2_CLOCK_HZ / 144.0;
        let freq = a4.fnum as f64 * chip_rate * 2f64.powi(a4.block as i32 - 1) / (1u32 << 20) as f64;
        assert_relative_eq!(freq, 440.0, max_relative = 0.002);
    }

    #[test]
    fn test_change_patch_programs_all_channels() {
        let (mut gen, shadow) = shared_generator();
        let mut ins = Instrument::named("Bell");
        ins.algorithm = 5;
        ins.feedback = 6;
        ins.operators[2].level = 0x22;
        ins.operators[2].fmult = 3;
        gen.change_patch(&ins, false);

        let chip = shadow.lock();
        for channel in 0..CHANNEL_COUNT {
            let (port, offset) = Generator::channel_address(channel);
            assert_eq!(chip.register(port, 0xB0 + offset), (6 << 3) | 5);
            // Slot 2 lives at +8
            assert_eq!(chip.register(port, 0x48 + offset), 0x22);
            assert_eq!(chip.register(port, 0x38 + offset) & 0x0F, 3);
        }
    }

    #[test]
    fn test_play_and_stop_note() {
        let (mut gen, shadow) = shared_generator();
        gen.change_note(69);
        gen.play_note();
        assert_eq!(shadow.lock().register(0, 0x28), 0xF0);
        assert_eq!(shadow.lock().register(0, 0xA4) >> 3, 4);
        assert_eq!(gen.debug_info().channels_playing, 1);

        gen.stop_note();
        assert_eq!(shadow.lock().register(0, 0x28), 0x00);
        assert_eq!(gen.debug_info().channels_playing, 0);
    }

    #[test]
    fn test_chord_uses_consecutive_channels() {
        let (mut gen, shadow) = shared_generator();
        gen.change_note(60);
        gen.play_chord(ChordType::Major7);
        assert_eq!(gen.debug_info().channels_playing, 4);
        // Fourth voice is channel 3, first channel of port 1
        assert_eq!(shadow.lock().register(0, 0x28), 0xF4);
        assert_ne!(shadow.lock().register(1, 0xA0), 0);
    }

    #[test]
    fn test_drum_plays_percussion_note() {
        let (mut gen, shadow) = shared_generator();
        let mut ins = Instrument::default();
        ins.perc_note_num = 69;
        gen.change_patch(&ins, true);
        gen.change_note(20);
        gen.play_note();
        let expected = FNumber::from_note(69);
        assert_eq!(shadow.lock().register(0, 0xA0), (expected.fnum & 0xFF) as u8);
    }

    #[test]
    fn test_silence_mutes_then_restores() {
        let (mut gen, shadow) = shared_generator();
        gen.change_note(60);
        gen.play_note();
        gen.silence();
        assert_eq!(shadow.lock().register(0, 0x4C), LEVEL_MAX);
        assert_eq!(gen.debug_info().channels_playing, 0);

        gen.play_note();
        // Default patch has its last slot at full level
        assert_eq!(shadow.lock().register(0, 0x4C), 0);
    }

    #[test]
    fn test_lfo_register() {
        let (mut gen, shadow) = shared_generator();
        gen.change_lfo(true);
        gen.change_lfo_freq(5);
        assert_eq!(shadow.lock().register(0, 0x22), 0x08 | 5);
        gen.change_lfo_freq(42);
        assert_eq!(gen.debug_info().lfo_freq, 7);
    }

    #[test]
    fn test_generate_respects_frame_count() {
        let (mut gen, _) = shared_generator();
        let mut frames = [0i16; 16];
        gen.generate(&mut frames, 4);
        assert!(frames[..8].iter().all(|&s| s == 1));
        assert!(frames[8..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_switch_chip_reprograms() {
        let (mut gen, shadow) = shared_generator();
        let mut ins = Instrument::default();
        ins.algorithm = 2;
        gen.change_patch(&ins, false);
        gen.change_lfo(true);
        gen.switch_chip(ChipType::Ym2608);
        assert_eq!(gen.chip_type(), ChipType::Ym2608);
        assert_eq!(shadow.lock().register(1, 0xB2) & 0x07, 2);
        assert_eq!(shadow.lock().register(0, 0x22), 0x08);
    }
}

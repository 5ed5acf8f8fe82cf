//! Synthesizer device interface
//!
//! [`Synthesizer`] is what the realtime engine drives: note, chord, patch and
//! LFO control plus block rendering. [`Generator`] implements it on top of an
//! opaque, register-addressable [`FmChip`] backend.

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::instrument::Instrument;

pub mod generator;
#[cfg(feature = "softsynth")]
pub mod softsynth;

pub use generator::Generator;

/// Chip backend selection
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, FromPrimitive, Serialize, Deserialize,
)]
pub enum ChipType {
    /// Yamaha YM2612 (OPN2)
    #[default]
    Ym2612 = 0,
    /// Yamaha YM2608 (OPNA), FM part
    Ym2608 = 1,
}

impl ChipType {
    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            ChipType::Ym2612 => "YM2612",
            ChipType::Ym2608 => "YM2608",
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chord shapes playable for patch auditioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ChordType {
    /// Root, major third, fifth
    Major = 0,
    /// Root, minor third, fifth
    Minor = 1,
    /// Root, major third, augmented fifth
    Augmented = 2,
    /// Root, minor third, diminished fifth
    Diminished = 3,
    /// Major triad plus major seventh
    Major7 = 4,
    /// Minor triad plus minor seventh
    Minor7 = 5,
}

impl ChordType {
    /// Semitone offsets from the root
    pub fn intervals(self) -> &'static [i32] {
        match self {
            ChordType::Major => &[0, 4, 7],
            ChordType::Minor => &[0, 3, 7],
            ChordType::Augmented => &[0, 4, 8],
            ChordType::Diminished => &[0, 3, 6],
            ChordType::Major7 => &[0, 4, 7, 11],
            ChordType::Minor7 => &[0, 3, 7, 10],
        }
    }

    /// Parse a lowercase chord name ("major", "min7", ...)
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "major" | "maj" => Some(ChordType::Major),
            "minor" | "min" => Some(ChordType::Minor),
            "augmented" | "aug" => Some(ChordType::Augmented),
            "diminished" | "dim" => Some(ChordType::Diminished),
            "major7" | "maj7" => Some(ChordType::Major7),
            "minor7" | "min7" => Some(ChordType::Minor7),
            _ => None,
        }
    }
}

/// Snapshot of synthesizer state for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Name of the emulator backend
    pub chip_name: &'static str,
    /// Number of channels currently keyed on
    pub channels_playing: u32,
    /// Current note
    pub note: i32,
    /// Whether the LFO is enabled
    pub lfo_enabled: bool,
    /// LFO frequency index (0..7)
    pub lfo_freq: u8,
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chip: {}, Channels: {}, Note: {}, LFO: {} ({})",
            self.chip_name,
            self.channels_playing,
            self.note,
            if self.lfo_enabled { "on" } else { "off" },
            self.lfo_freq
        )
    }
}

/// Synthesizer driven by the realtime engine
///
/// Every method except [`Synthesizer::switch_chip`] is called from the audio
/// callback and must neither block nor allocate.
pub trait Synthesizer: Send {
    /// Set the note used by the next play/stop/chord call
    fn change_note(&mut self, note: i32);

    /// Key on the current note
    fn play_note(&mut self);

    /// Key off the current note
    fn stop_note(&mut self);

    /// Key on a chord rooted at the current note
    fn play_chord(&mut self, chord: ChordType);

    /// Program a new patch on every channel
    fn change_patch(&mut self, instrument: &Instrument, is_drum: bool);

    /// Enable or disable the chip LFO
    fn change_lfo(&mut self, enabled: bool);

    /// Set the chip LFO frequency index
    fn change_lfo_freq(&mut self, freq: i32);

    /// Cut all sound immediately
    fn silence(&mut self);

    /// Key off every channel, letting releases ring out
    fn note_off_all_chans(&mut self);

    /// Render `frame_count` interleaved stereo frames into `frames`
    fn generate(&mut self, frames: &mut [i16], frame_count: usize);

    /// Replace the emulator backend (control thread only; may allocate)
    fn switch_chip(&mut self, chip: ChipType);

    /// Monitoring snapshot
    fn debug_info(&self) -> DebugInfo;
}

/// Register-addressable FM chip emulator
///
/// The numeric core is opaque: it only sees register writes and is asked to
/// render interleaved stereo `i16` frames.
pub trait FmChip: Send {
    /// Emulator name
    fn name(&self) -> &'static str;

    /// Reset every register and generator
    fn reset(&mut self);

    /// Write `value` to register `reg` of `port` (0 or 1)
    fn write_reg(&mut self, port: u8, reg: u8, value: u8);

    /// Fill `frames` (interleaved L/R) with rendered audio
    fn generate(&mut self, frames: &mut [i16]);
}

/// Silent backend keeping a shadow of the register file
///
/// Used when no emulator is linked and in tests, where the shadow shows what
/// the generator programmed.
#[derive(Debug, Clone)]
pub struct NullChip {
    registers: [[u8; 256]; 2],
    writes: u64,
}

impl NullChip {
    /// Create a silent chip with all registers cleared
    pub fn new() -> Self {
        NullChip {
            registers: [[0; 256]; 2],
            writes: 0,
        }
    }

    /// Last value written to `reg` on `port`
    pub fn register(&self, port: u8, reg: u8) -> u8 {
        self.registers[(port & 1) as usize][reg as usize]
    }

    /// Number of register writes since creation or reset
    pub fn write_count(&self) -> u64 {
        self.writes
    }
}

impl Default for NullChip {
    fn default() -> Self {
        Self::new()
    }
}

impl FmChip for NullChip {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn reset(&mut self) {
        self.registers = [[0; 256]; 2];
        self.writes = 0;
    }

    fn write_reg(&mut self, port: u8, reg: u8, value: u8) {
        self.registers[(port & 1) as usize][reg as usize] = value;
        self.writes += 1;
    }

    fn generate(&mut self, frames: &mut [i16]) {
        frames.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_chord_intervals() {
        assert_eq!(ChordType::Major.intervals(), &[0, 4, 7]);
        assert_eq!(ChordType::Minor7.intervals().len(), 4);
        assert_eq!(ChordType::from_u32(3), Some(ChordType::Diminished));
        assert_eq!(ChordType::from_u32(6), None);
        assert_eq!(ChordType::from_name("maj7"), Some(ChordType::Major7));
    }

    #[test]
    fn test_chip_type_from_primitive() {
        assert_eq!(ChipType::from_i32(1), Some(ChipType::Ym2608));
        assert_eq!(ChipType::from_i32(-1), None);
        assert_eq!(ChipType::default().to_string(), "YM2612");
    }

    #[test]
    fn test_null_chip_shadow() {
        let mut chip = NullChip::new();
        chip.write_reg(1, 0xB0, 0x3A);
        assert_eq!(chip.register(1, 0xB0), 0x3A);
        assert_eq!(chip.register(0, 0xB0), 0);
        assert_eq!(chip.write_count(), 1);

        let mut frames = [7i16; 8];
        chip.generate(&mut frames);
        assert!(frames.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_debug_info_display() {
        let info = DebugInfo {
            chip_name: "Null",
            channels_playing: 3,
            note: 60,
            lfo_enabled: true,
            lfo_freq: 2,
        };
        assert_eq!(
            info.to_string(),
            "Chip: Null, Channels: 3, Note: 60, LFO: on (2)"
        );
    }
}

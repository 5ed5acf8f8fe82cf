//! FM instrument record
//!
//! A chip-independent, fixed-shape parameter set describing one 4-operator
//! timbre. Instruments are plain `Copy` values: they are passed by value
//! between the importer, the bank and the realtime message codec, and never
//! shared.
//!
//! Operators are stored in the chip's register slot order (OP1, OP3, OP2,
//! OP4), which is the same for the OPN (YM2612/YM2608) and OPM (YM2151)
//! families.
//!
//! Every numeric field has a defined bit width (see the `*_MAX` constants);
//! decoders clamp at the point of decode and [`Instrument::clamp`] restores the
//! invariant on hand-built values.

use serde::{Deserialize, Serialize};

/// Maximum name length in bytes
pub const NAME_LEN: usize = 32;

/// Number of operators per instrument
pub const OPERATOR_COUNT: usize = 4;

/// Size in bytes of the fixed wire encoding produced by [`Instrument::encode_into`]
pub const WIRE_SIZE: usize = NAME_LEN + OPERATOR_COUNT * Operator::WIRE_SIZE + 11;

/// Detune (DT1), 3 bits
pub const DETUNE_MAX: u8 = 0x07;
/// Frequency multiplier (MUL), 4 bits
pub const FMULT_MAX: u8 = 0x0F;
/// Total level (TL), 7 bits
pub const LEVEL_MAX: u8 = 0x7F;
/// Rate scaling (RS/KS), 2 bits
pub const RATESCALE_MAX: u8 = 0x03;
/// Attack rate (AR), 5 bits
pub const ATTACK_MAX: u8 = 0x1F;
/// First decay rate (D1R), 5 bits
pub const DECAY1_MAX: u8 = 0x1F;
/// Second decay rate (D2R), 5 bits
pub const DECAY2_MAX: u8 = 0x1F;
/// Sustain level (D1L), 4 bits
pub const SUSTAIN_MAX: u8 = 0x0F;
/// Release rate (RR), 4 bits
pub const RELEASE_MAX: u8 = 0x0F;
/// SSG-EG mode, 4 bits
pub const SSG_EG_MAX: u8 = 0x0F;
/// Feedback, 3 bits
pub const FEEDBACK_MAX: u8 = 0x07;
/// Algorithm, 3 bits
pub const ALGORITHM_MAX: u8 = 0x07;
/// AM sensitivity (AMS), 2 bits
pub const AMS_MAX: u8 = 0x03;
/// FM sensitivity (FMS/PMS), 3 bits
pub const FMS_MAX: u8 = 0x07;
/// Percussion key number, 7 bits
pub const PERC_NOTE_MAX: u8 = 0x7F;

/// One FM operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operator {
    /// Detune (DT1)
    pub detune: u8,
    /// Frequency multiplier (MUL)
    pub fmult: u8,
    /// Total level, 0 = loudest
    pub level: u8,
    /// Rate scaling (RS on OPN, KS on OPM)
    pub ratescale: u8,
    /// Attack rate
    pub attack: u8,
    /// Amplitude modulation enable
    pub am_enable: bool,
    /// First decay rate
    pub decay1: u8,
    /// Second decay (sustain) rate
    pub decay2: u8,
    /// Sustain level (D1L)
    pub sustain: u8,
    /// Release rate
    pub release: u8,
    /// SSG-EG mode (OPN only, 0 elsewhere)
    pub ssg_eg: u8,
}

impl Operator {
    /// Size in bytes of one encoded operator
    pub const WIRE_SIZE: usize = 11;

    /// Clamp every field to its bit width
    pub fn clamp(&mut self) {
        self.detune = self.detune.min(DETUNE_MAX);
        self.fmult = self.fmult.min(FMULT_MAX);
        self.level = self.level.min(LEVEL_MAX);
        self.ratescale = self.ratescale.min(RATESCALE_MAX);
        self.attack = self.attack.min(ATTACK_MAX);
        self.decay1 = self.decay1.min(DECAY1_MAX);
        self.decay2 = self.decay2.min(DECAY2_MAX);
        self.sustain = self.sustain.min(SUSTAIN_MAX);
        self.release = self.release.min(RELEASE_MAX);
        self.ssg_eg = self.ssg_eg.min(SSG_EG_MAX);
    }

    /// Build an operator from the seven YM2612 operator registers
    ///
    /// `regs` are the values of the 0x30, 0x40, 0x50, 0x60, 0x70, 0x80 and
    /// 0x90 register groups for this slot. Masking keeps every field in range.
    pub fn from_opn_registers(regs: [u8; 7]) -> Self {
        let [dt_mul, tl, rs_ar, am_d1r, d2r, d1l_rr, ssg] = regs;
        Operator {
            detune: (dt_mul >> 4) & DETUNE_MAX,
            fmult: dt_mul & FMULT_MAX,
            level: tl & LEVEL_MAX,
            ratescale: (rs_ar >> 6) & RATESCALE_MAX,
            attack: rs_ar & ATTACK_MAX,
            am_enable: am_d1r & 0x80 != 0,
            decay1: am_d1r & DECAY1_MAX,
            decay2: d2r & DECAY2_MAX,
            sustain: (d1l_rr >> 4) & SUSTAIN_MAX,
            release: d1l_rr & RELEASE_MAX,
            ssg_eg: ssg & SSG_EG_MAX,
        }
    }

    /// Encode as the seven YM2612 operator register values (0x30..0x90 groups)
    pub fn to_opn_registers(&self) -> [u8; 7] {
        let mut op = *self;
        op.clamp();
        [
            (op.detune << 4) | op.fmult,
            op.level,
            (op.ratescale << 6) | op.attack,
            ((op.am_enable as u8) << 7) | op.decay1,
            op.decay2,
            (op.sustain << 4) | op.release,
            op.ssg_eg,
        ]
    }

    fn encode_into(&self, out: &mut [u8]) {
        out[0] = self.detune;
        out[1] = self.fmult;
        out[2] = self.level;
        out[3] = self.ratescale;
        out[4] = self.attack;
        out[5] = self.am_enable as u8;
        out[6] = self.decay1;
        out[7] = self.decay2;
        out[8] = self.sustain;
        out[9] = self.release;
        out[10] = self.ssg_eg;
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut op = Operator {
            detune: bytes[0],
            fmult: bytes[1],
            level: bytes[2],
            ratescale: bytes[3],
            attack: bytes[4],
            am_enable: bytes[5] != 0,
            decay1: bytes[6],
            decay2: bytes[7],
            sustain: bytes[8],
            release: bytes[9],
            ssg_eg: bytes[10],
        };
        op.clamp();
        op
    }
}

/// A complete 4-operator FM instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    #[serde(with = "name_field")]
    name: [u8; NAME_LEN],
    /// Operators in register slot order (OP1, OP3, OP2, OP4)
    pub operators: [Operator; OPERATOR_COUNT],
    /// Operator 1 self-feedback
    pub feedback: u8,
    /// Operator connection algorithm
    pub algorithm: u8,
    /// Amplitude modulation sensitivity
    pub am_sensitivity: u8,
    /// Frequency modulation sensitivity
    pub fm_sensitivity: u8,
    /// Key played when the instrument is used as a drum
    pub perc_note_num: u8,
    /// Semitone offset applied to played notes
    pub note_offset: i16,
    /// Measured key-on sound duration in milliseconds (0 = not measured)
    pub ms_sound_kon: u16,
    /// Measured key-off sound duration in milliseconds (0 = not measured)
    pub ms_sound_koff: u16,
}

impl Default for Instrument {
    /// A neutral sine-like patch: algorithm 7, carriers at full level
    fn default() -> Self {
        let op = Operator {
            fmult: 1,
            attack: ATTACK_MAX,
            decay1: 0,
            sustain: 0,
            release: 0x08,
            ..Operator::default()
        };
        let mut operators = [op; OPERATOR_COUNT];
        for op in &mut operators[..3] {
            op.level = LEVEL_MAX;
        }
        Instrument {
            name: [0; NAME_LEN],
            operators,
            feedback: 0,
            algorithm: ALGORITHM_MAX,
            am_sensitivity: 0,
            fm_sensitivity: 0,
            perc_note_num: 0,
            note_offset: 0,
            ms_sound_kon: 0,
            ms_sound_koff: 0,
        }
    }
}

impl Instrument {
    /// Create a default instrument with the given name
    pub fn named(name: &str) -> Self {
        let mut ins = Instrument::default();
        ins.set_name(name);
        ins
    }

    /// Instrument name
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        // set_name only stores whole UTF-8 sequences; decode() validates too
        std::str::from_utf8(&self.name[..end]).unwrap_or_default()
    }

    /// Set the name, truncated to [`NAME_LEN`] bytes at a char boundary
    pub fn set_name(&mut self, name: &str) {
        let mut end = name.len().min(NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.name = [0; NAME_LEN];
        self.name[..end].copy_from_slice(&name.as_bytes()[..end]);
    }

    /// Clamp every numeric field to its bit width
    pub fn clamp(&mut self) {
        for op in &mut self.operators {
            op.clamp();
        }
        self.feedback = self.feedback.min(FEEDBACK_MAX);
        self.algorithm = self.algorithm.min(ALGORITHM_MAX);
        self.am_sensitivity = self.am_sensitivity.min(AMS_MAX);
        self.fm_sensitivity = self.fm_sensitivity.min(FMS_MAX);
        self.perc_note_num = self.perc_note_num.min(PERC_NOTE_MAX);
    }

    /// Feedback/algorithm register value (0xB0 group)
    pub fn fb_alg_register(&self) -> u8 {
        ((self.feedback & FEEDBACK_MAX) << 3) | (self.algorithm & ALGORITHM_MAX)
    }

    /// Panning/LFO sensitivity register value (0xB4 group), both outputs enabled
    pub fn lr_ams_fms_register(&self) -> u8 {
        0xC0 | ((self.am_sensitivity & AMS_MAX) << 4) | (self.fm_sensitivity & FMS_MAX)
    }

    /// Whether operator `slot` (register order) is a carrier for this algorithm
    pub fn is_carrier(&self, slot: usize) -> bool {
        // Slot order is OP1, OP3, OP2, OP4
        const CARRIERS: [[bool; OPERATOR_COUNT]; 8] = [
            [false, false, false, true],
            [false, false, false, true],
            [false, false, false, true],
            [false, false, false, true],
            [false, false, true, true],
            [false, true, true, true],
            [false, true, true, true],
            [true, true, true, true],
        ];
        CARRIERS[(self.algorithm & ALGORITHM_MAX) as usize][slot & 3]
    }

    /// Write the fixed-size wire encoding into `out`
    ///
    /// Layout: name (32), 4 x operator (11), feedback, algorithm, AMS, FMS,
    /// percussion note, note offset (i16 LE), key-on ms (u16 LE), key-off ms
    /// (u16 LE).
    pub fn encode_into(&self, out: &mut [u8; WIRE_SIZE]) {
        out[..NAME_LEN].copy_from_slice(&self.name);
        let mut pos = NAME_LEN;
        for op in &self.operators {
            op.encode_into(&mut out[pos..pos + Operator::WIRE_SIZE]);
            pos += Operator::WIRE_SIZE;
        }
        out[pos] = self.feedback;
        out[pos + 1] = self.algorithm;
        out[pos + 2] = self.am_sensitivity;
        out[pos + 3] = self.fm_sensitivity;
        out[pos + 4] = self.perc_note_num;
        out[pos + 5..pos + 7].copy_from_slice(&self.note_offset.to_le_bytes());
        out[pos + 7..pos + 9].copy_from_slice(&self.ms_sound_kon.to_le_bytes());
        out[pos + 9..pos + 11].copy_from_slice(&self.ms_sound_koff.to_le_bytes());
    }

    /// Decode the wire encoding, clamping every field
    pub fn decode(bytes: &[u8; WIRE_SIZE]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&bytes[..NAME_LEN]);
        let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        if std::str::from_utf8(&name[..end]).is_err() {
            name = [0; NAME_LEN];
        }

        let mut operators = [Operator::default(); OPERATOR_COUNT];
        let mut pos = NAME_LEN;
        for op in &mut operators {
            *op = Operator::decode(&bytes[pos..pos + Operator::WIRE_SIZE]);
            pos += Operator::WIRE_SIZE;
        }

        let mut ins = Instrument {
            name,
            operators,
            feedback: bytes[pos],
            algorithm: bytes[pos + 1],
            am_sensitivity: bytes[pos + 2],
            fm_sensitivity: bytes[pos + 3],
            perc_note_num: bytes[pos + 4],
            note_offset: i16::from_le_bytes([bytes[pos + 5], bytes[pos + 6]]),
            ms_sound_kon: u16::from_le_bytes([bytes[pos + 7], bytes[pos + 8]]),
            ms_sound_koff: u16::from_le_bytes([bytes[pos + 9], bytes[pos + 10]]),
        };
        ins.clamp();
        ins
    }
}

mod name_field {
    use super::NAME_LEN;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(name: &[u8; NAME_LEN], s: S) -> Result<S::Ok, S::Error> {
        let end = name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        s.serialize_str(&String::from_utf8_lossy(&name[..end]))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; NAME_LEN], D::Error> {
        let text = String::deserialize(d)?;
        let mut ins = super::Instrument::default();
        ins.set_name(&text);
        Ok(ins.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_truncates_at_char_boundary() {
        let mut ins = Instrument::default();
        ins.set_name("Slap Bass");
        assert_eq!(ins.name(), "Slap Bass");

        // 31 ASCII bytes + a 2-byte char would straddle the limit
        let long = format!("{}é", "a".repeat(31));
        ins.set_name(&long);
        assert_eq!(ins.name(), "a".repeat(31));
    }

    #[test]
    fn test_operator_register_layout() {
        let op = Operator::from_opn_registers([0x71, 0x23, 0x5F, 0x85, 0x02, 0x1A, 0x08]);
        assert_eq!(op.detune, 7);
        assert_eq!(op.fmult, 1);
        assert_eq!(op.level, 0x23);
        assert_eq!(op.ratescale, 1);
        assert_eq!(op.attack, 0x1F);
        assert!(op.am_enable);
        assert_eq!(op.decay1, 5);
        assert_eq!(op.decay2, 2);
        assert_eq!(op.sustain, 1);
        assert_eq!(op.release, 0xA);
        assert_eq!(op.ssg_eg, 8);
        assert_eq!(
            op.to_opn_registers(),
            [0x71, 0x23, 0x5F, 0x85, 0x02, 0x1A, 0x08]
        );
    }

    #[test]
    fn test_register_masks_out_of_range_bits() {
        let op = Operator::from_opn_registers([0xFF; 7]);
        assert_eq!(op.detune, DETUNE_MAX);
        assert_eq!(op.level, LEVEL_MAX);
        assert_eq!(op.decay2, DECAY2_MAX);
        assert_eq!(op.ssg_eg, SSG_EG_MAX);
    }

    #[test]
    fn test_clamp() {
        let mut ins = Instrument::default();
        ins.feedback = 200;
        ins.algorithm = 9;
        ins.operators[2].attack = 0xFF;
        ins.perc_note_num = 0x90;
        ins.clamp();
        assert_eq!(ins.feedback, FEEDBACK_MAX);
        assert_eq!(ins.algorithm, ALGORITHM_MAX);
        assert_eq!(ins.operators[2].attack, ATTACK_MAX);
        assert_eq!(ins.perc_note_num, PERC_NOTE_MAX);
    }

    #[test]
    fn test_wire_encoding_preserves_fields() {
        let mut ins = Instrument::named("Brass");
        ins.feedback = 5;
        ins.algorithm = 4;
        ins.fm_sensitivity = 3;
        ins.note_offset = -12;
        ins.ms_sound_kon = 1234;
        ins.operators[1].ssg_eg = 0x0B;

        let mut wire = [0u8; WIRE_SIZE];
        ins.encode_into(&mut wire);
        assert_eq!(Instrument::decode(&wire), ins);
    }

    #[test]
    fn test_decode_clamps_garbage() {
        let wire = [0xFFu8; WIRE_SIZE];
        let ins = Instrument::decode(&wire);
        assert_eq!(ins.name(), "");
        assert_eq!(ins.algorithm, ALGORITHM_MAX);
        assert_eq!(ins.operators[0].fmult, FMULT_MAX);
        assert_eq!(ins.note_offset, -1);
    }

    #[test]
    fn test_carriers() {
        let mut ins = Instrument::default();
        ins.algorithm = 0;
        assert!(ins.is_carrier(3));
        assert!(!ins.is_carrier(0));
        ins.algorithm = 4;
        assert!(ins.is_carrier(2) && ins.is_carrier(3) && !ins.is_carrier(1));
    }

    #[test]
    fn test_serde_name_as_string() {
        let ins = Instrument::named("Lead");
        let json = serde_json::to_string(&ins).unwrap();
        assert!(json.contains("\"name\":\"Lead\""));
        let back: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ins);
    }
}

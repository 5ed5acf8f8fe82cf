//! Tagged message codec for the control and MIDI rings
//!
//! Every message is a fixed 8-byte header (`tag: u32`, `size: u32`, both
//! little-endian) followed by exactly `size` payload bytes. Payload layout is
//! fixed per tag:
//!
//! | Tag | Message              | Payload                                   |
//! |-----|----------------------|-------------------------------------------|
//! | 0   | MIDI event           | raw MIDI bytes (1..=64)                   |
//! | 1   | silence              | none                                      |
//! | 2   | note off, all chans  | none                                      |
//! | 3   | play note            | note `u32`                                |
//! | 4   | stop note            | note `u32`                                |
//! | 5   | play chord           | chord `u32`, note `u32`                   |
//! | 6   | patch change         | instrument (87 bytes), is-drum `u8`       |
//! | 7   | LFO enable           | `u8` (0 or 1)                             |
//! | 8   | LFO frequency        | `i32`                                     |
//!
//! Encoding happens into a caller-provided stack buffer of
//! [`MAX_WIRE_SIZE`] bytes so the header and payload can be published in one
//! ring put.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::instrument::{self, Instrument};
use crate::synth::ChordType;

/// Size of the message header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest MIDI message carried by the MIDI ring
pub const MIDI_MESSAGE_MAX: usize = 64;

/// Payload size of a patch change
pub const PATCH_PAYLOAD_SIZE: usize = instrument::WIRE_SIZE + 1;

/// Largest encoded message (header plus the biggest payload)
pub const MAX_WIRE_SIZE: usize = HEADER_SIZE
    + if PATCH_PAYLOAD_SIZE > MIDI_MESSAGE_MAX {
        PATCH_PAYLOAD_SIZE
    } else {
        MIDI_MESSAGE_MAX
    };

/// Smallest usable ring: a patch change plus one more message of any kind,
/// queued before the renderer gets a chance to drain
pub const MIN_FIFO_CAPACITY: usize = 2 * MAX_WIRE_SIZE;

/// Message tags as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum MessageTag {
    /// Raw MIDI bytes
    MidiEvent = 0,
    /// Cut all sound
    Silence = 1,
    /// Key off every channel
    NoteOffAllChans = 2,
    /// Set the note and key it on
    PlayNote = 3,
    /// Set the note and key it off
    StopNote = 4,
    /// Set the root note and key on a chord
    PlayChord = 5,
    /// Program a patch
    PatchChange = 6,
    /// Enable or disable the LFO
    Lfo = 7,
    /// Set the LFO frequency
    LfoFreq = 8,
}

/// Decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Raw tag value
    pub tag: u32,
    /// Payload size in bytes
    pub size: u32,
}

impl MessageHeader {
    /// Serialize to the little-endian wire form
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.tag.to_le_bytes());
        out[4..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Parse the little-endian wire form
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        MessageHeader {
            tag: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            size: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Header plus payload size
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.size as usize
    }
}

/// Inline MIDI message storage
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MidiBytes {
    len: u8,
    data: [u8; MIDI_MESSAGE_MAX],
}

impl MidiBytes {
    /// Copy `bytes`; returns `None` when empty or longer than [`MIDI_MESSAGE_MAX`]
    pub fn new(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MIDI_MESSAGE_MAX {
            return None;
        }
        let mut data = [0u8; MIDI_MESSAGE_MAX];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(MidiBytes {
            len: bytes.len() as u8,
            data,
        })
    }

    /// The message bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl std::fmt::Debug for MidiBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MidiBytes").field(&self.as_bytes()).finish()
    }
}

/// A typed control or MIDI message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Raw MIDI bytes, interpreted at apply time
    Midi(MidiBytes),
    /// Cut all sound
    Silence,
    /// Key off every channel
    NoteOffAllChans,
    /// Set the note and key it on
    PlayNote(u32),
    /// Set the note and key it off
    StopNote(u32),
    /// Set the root note and key on a chord
    PlayChord {
        /// Chord shape
        chord: ChordType,
        /// Root note
        note: u32,
    },
    /// Program a patch
    PatchChange {
        /// Instrument to program
        instrument: Instrument,
        /// Percussion flag
        is_drum: bool,
    },
    /// Enable or disable the LFO
    Lfo(bool),
    /// Set the LFO frequency index
    LfoFreq(i32),
}

impl Message {
    /// Wire tag of this message
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Midi(_) => MessageTag::MidiEvent,
            Message::Silence => MessageTag::Silence,
            Message::NoteOffAllChans => MessageTag::NoteOffAllChans,
            Message::PlayNote(_) => MessageTag::PlayNote,
            Message::StopNote(_) => MessageTag::StopNote,
            Message::PlayChord { .. } => MessageTag::PlayChord,
            Message::PatchChange { .. } => MessageTag::PatchChange,
            Message::Lfo(_) => MessageTag::Lfo,
            Message::LfoFreq(_) => MessageTag::LfoFreq,
        }
    }

    /// Encode header and payload into `out`, returning the encoded length
    pub fn encode(&self, out: &mut [u8; MAX_WIRE_SIZE]) -> usize {
        let payload = &mut out[HEADER_SIZE..];
        let size = match self {
            Message::Midi(midi) => {
                let bytes = midi.as_bytes();
                payload[..bytes.len()].copy_from_slice(bytes);
                bytes.len()
            }
            Message::Silence | Message::NoteOffAllChans => 0,
            Message::PlayNote(note) | Message::StopNote(note) => {
                payload[..4].copy_from_slice(&note.to_le_bytes());
                4
            }
            Message::PlayChord { chord, note } => {
                payload[..4].copy_from_slice(&(*chord as u32).to_le_bytes());
                payload[4..8].copy_from_slice(&note.to_le_bytes());
                8
            }
            Message::PatchChange {
                instrument,
                is_drum,
            } => {
                let mut ins = [0u8; instrument::WIRE_SIZE];
                instrument.encode_into(&mut ins);
                payload[..instrument::WIRE_SIZE].copy_from_slice(&ins);
                payload[instrument::WIRE_SIZE] = *is_drum as u8;
                PATCH_PAYLOAD_SIZE
            }
            Message::Lfo(enabled) => {
                payload[0] = *enabled as u8;
                1
            }
            Message::LfoFreq(freq) => {
                payload[..4].copy_from_slice(&freq.to_le_bytes());
                4
            }
        };
        let header = MessageHeader {
            tag: self.tag() as u32,
            size: size as u32,
        };
        out[..HEADER_SIZE].copy_from_slice(&header.encode());
        HEADER_SIZE + size
    }

    /// Decode a payload for `tag`
    ///
    /// Returns `None` for unknown tags, payloads of the wrong size and
    /// out-of-range chord values. Such messages are skipped by the engine.
    pub fn decode(tag: u32, payload: &[u8]) -> Option<Message> {
        let tag = MessageTag::from_u32(tag)?;
        let read_u32 = |bytes: &[u8]| -> Option<u32> {
            Some(u32::from_le_bytes(bytes.get(..4)?.try_into().ok()?))
        };
        let msg = match (tag, payload.len()) {
            (MessageTag::MidiEvent, _) => Message::Midi(MidiBytes::new(payload)?),
            (MessageTag::Silence, 0) => Message::Silence,
            (MessageTag::NoteOffAllChans, 0) => Message::NoteOffAllChans,
            (MessageTag::PlayNote, 4) => Message::PlayNote(read_u32(payload)?),
            (MessageTag::StopNote, 4) => Message::StopNote(read_u32(payload)?),
            (MessageTag::PlayChord, 8) => Message::PlayChord {
                chord: ChordType::from_u32(read_u32(payload)?)?,
                note: read_u32(&payload[4..])?,
            },
            (MessageTag::PatchChange, PATCH_PAYLOAD_SIZE) => {
                let ins: &[u8; instrument::WIRE_SIZE] =
                    payload[..instrument::WIRE_SIZE].try_into().ok()?;
                Message::PatchChange {
                    instrument: Instrument::decode(ins),
                    is_drum: payload[instrument::WIRE_SIZE] != 0,
                }
            }
            (MessageTag::Lfo, 1) => Message::Lfo(payload[0] != 0),
            (MessageTag::LfoFreq, 4) => Message::LfoFreq(read_u32(payload)? as i32),
            _ => return None,
        };
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(msg: &Message) -> Vec<u8> {
        let mut buf = [0u8; MAX_WIRE_SIZE];
        let len = msg.encode(&mut buf);
        buf[..len].to_vec()
    }

    fn reparse(bytes: &[u8]) -> Option<Message> {
        let header = MessageHeader::decode(bytes[..HEADER_SIZE].try_into().unwrap());
        assert_eq!(header.wire_size(), bytes.len());
        Message::decode(header.tag, &bytes[HEADER_SIZE..])
    }

    #[test]
    fn test_max_wire_size_covers_every_payload() {
        assert_eq!(PATCH_PAYLOAD_SIZE, 88);
        assert_eq!(MAX_WIRE_SIZE, HEADER_SIZE + 88);
        assert!(MAX_WIRE_SIZE >= HEADER_SIZE + MIDI_MESSAGE_MAX);
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let bytes = wire(&Message::PlayNote(60));
        assert_eq!(&bytes[..8], &[3, 0, 0, 0, 4, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[60, 0, 0, 0]);
    }

    #[test]
    fn test_empty_payload_messages() {
        assert_eq!(wire(&Message::Silence), vec![1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(wire(&Message::NoteOffAllChans)[0], 2);
    }

    #[test]
    fn test_lfo_freq_has_its_own_tag() {
        let bytes = wire(&Message::LfoFreq(5));
        assert_eq!(bytes[0], MessageTag::LfoFreq as u8);
        assert_ne!(bytes[0], MessageTag::Lfo as u8);
        assert_eq!(reparse(&bytes), Some(Message::LfoFreq(5)));
    }

    #[test]
    fn test_patch_change_carries_instrument_and_drum_flag() {
        let mut ins = Instrument::named("Lead");
        ins.algorithm = 4;
        ins.feedback = 6;
        ins.operators[2].level = 33;
        let msg = Message::PatchChange {
            instrument: ins,
            is_drum: true,
        };
        let bytes = wire(&msg);
        assert_eq!(bytes.len(), HEADER_SIZE + 88);
        assert_eq!(*bytes.last().unwrap(), 1);
        assert_eq!(reparse(&bytes), Some(msg));
    }

    #[test]
    fn test_chord_decoding_rejects_unknown_shape() {
        let mut bytes = wire(&Message::PlayChord {
            chord: ChordType::Minor7,
            note: 48,
        });
        assert_eq!(
            reparse(&bytes),
            Some(Message::PlayChord {
                chord: ChordType::Minor7,
                note: 48
            })
        );
        bytes[HEADER_SIZE] = 42;
        assert_eq!(reparse(&bytes), None);
    }

    #[test]
    fn test_midi_bytes_bounds() {
        assert!(MidiBytes::new(&[]).is_none());
        assert!(MidiBytes::new(&[0; MIDI_MESSAGE_MAX + 1]).is_none());
        let midi = MidiBytes::new(&[0x90, 60, 100]).unwrap();
        assert_eq!(midi.as_bytes(), &[0x90, 60, 100]);
        assert_eq!(reparse(&wire(&Message::Midi(midi))), Some(Message::Midi(midi)));
    }

    #[test]
    fn test_unknown_tag_and_bad_size_rejected() {
        assert_eq!(Message::decode(99, &[]), None);
        assert_eq!(Message::decode(MessageTag::PlayNote as u32, &[1, 2]), None);
        assert_eq!(Message::decode(MessageTag::Silence as u32, &[0]), None);
    }
}

//! Control handle and realtime renderer
//!
//! [`RealtimeGenerator::build`] wraps a [`Synthesizer`] and returns two ends:
//!
//! - [`RealtimeControl`]: cloneable, used by UI/control threads and MIDI input.
//!   Control messages go to the control ring and wait (sleep-polling) for space;
//!   MIDI messages go to the MIDI ring and are dropped when they do not fit.
//! - [`RealtimeRenderer`]: owned by the audio callback. Each call to
//!   [`RealtimeRenderer::generate`] try-locks the synthesizer, drains the control
//!   ring then the MIDI ring, applies every message and renders one block. If
//!   the lock is held elsewhere (chip switch, debug query) the block is silence.
//!
//! The renderer never blocks, never allocates and never logs.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::message::{Message, MessageHeader, MidiBytes, HEADER_SIZE, MAX_WIRE_SIZE};
use super::ring_buffer::{RingBuffer, RingConsumer, RingProducer};
use crate::config::EngineConfig;
use crate::instrument::Instrument;
use crate::synth::{ChipType, ChordType, DebugInfo, Synthesizer};
use crate::Result;

/// MIDI controller 120: all sound off
const CC_ALL_SOUND_OFF: u8 = 120;
/// MIDI controller 123: all notes off
const CC_ALL_NOTES_OFF: u8 = 123;

/// What the renderer is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Between callbacks
    Idle = 0,
    /// Applying queued messages
    Draining = 1,
    /// Rendering audio
    Rendering = 2,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Draining,
            2 => EngineState::Rendering,
            _ => EngineState::Idle,
        }
    }
}

/// Engine statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Number of generate calls
    pub callbacks: u64,
    /// Calls that output silence because the synthesizer was locked
    pub silenced_callbacks: u64,
    /// Messages decoded and applied
    pub messages_applied: u64,
    /// Messages skipped (unknown tag or malformed payload)
    pub messages_skipped: u64,
    /// MIDI messages dropped on the producer side
    pub midi_dropped: u64,
}

#[derive(Default)]
struct SharedStats {
    callbacks: AtomicU64,
    silenced_callbacks: AtomicU64,
    messages_applied: AtomicU64,
    messages_skipped: AtomicU64,
    midi_dropped: AtomicU64,
    state: AtomicU8,
}

impl SharedStats {
    fn snapshot(&self) -> RenderStats {
        RenderStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            silenced_callbacks: self.silenced_callbacks.load(Ordering::Relaxed),
            messages_applied: self.messages_applied.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            midi_dropped: self.midi_dropped.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Builder for the control/renderer pair
pub struct RealtimeGenerator<S: Synthesizer> {
    control: RealtimeControl<S>,
    renderer: RealtimeRenderer<S>,
}

impl<S: Synthesizer> RealtimeGenerator<S> {
    /// Wrap `synth` with two rings of `config.fifo_capacity` bytes each
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `config` does not validate.
    pub fn new(synth: S, config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let (ctl_producer, ctl_consumer) = RingBuffer::new(config.fifo_capacity)?.split();
        let (midi_producer, midi_consumer) = RingBuffer::new(config.fifo_capacity)?.split();
        let synth = Arc::new(Mutex::new(synth));
        let stats = Arc::new(SharedStats::default());

        log::debug!(
            "realtime engine: two {} byte rings, {} Hz",
            config.fifo_capacity,
            config.sample_rate
        );

        Ok(RealtimeGenerator {
            control: RealtimeControl {
                synth: Arc::clone(&synth),
                ctl: Arc::new(Mutex::new(ctl_producer)),
                midi: Arc::new(Mutex::new(midi_producer)),
                stats: Arc::clone(&stats),
                note: Arc::new(AtomicU32::new(60)),
                backoff: Duration::from_micros(config.backoff_micros.max(1)),
                midi_message_max: config.midi_message_max.min(super::message::MIDI_MESSAGE_MAX),
            },
            renderer: RealtimeRenderer {
                synth,
                ctl: ctl_consumer,
                midi: midi_consumer,
                body: vec![0u8; config.fifo_capacity].into_boxed_slice(),
                stats,
            },
        })
    }

    /// Build and split in one go
    pub fn build(
        synth: S,
        config: &EngineConfig,
    ) -> Result<(RealtimeControl<S>, RealtimeRenderer<S>)> {
        Ok(Self::new(synth, config)?.split())
    }

    /// Control handle
    pub fn control(&self) -> &RealtimeControl<S> {
        &self.control
    }

    /// Renderer, for driving the engine from the owning thread
    pub fn renderer_mut(&mut self) -> &mut RealtimeRenderer<S> {
        &mut self.renderer
    }

    /// Separate the control handle from the renderer
    pub fn split(self) -> (RealtimeControl<S>, RealtimeRenderer<S>) {
        (self.control, self.renderer)
    }
}

/// Control-side handle; cheap to clone and safe to share between threads
pub struct RealtimeControl<S: Synthesizer> {
    synth: Arc<Mutex<S>>,
    ctl: Arc<Mutex<RingProducer>>,
    midi: Arc<Mutex<RingProducer>>,
    stats: Arc<SharedStats>,
    note: Arc<AtomicU32>,
    backoff: Duration,
    midi_message_max: usize,
}

impl<S: Synthesizer> Clone for RealtimeControl<S> {
    fn clone(&self) -> Self {
        RealtimeControl {
            synth: Arc::clone(&self.synth),
            ctl: Arc::clone(&self.ctl),
            midi: Arc::clone(&self.midi),
            stats: Arc::clone(&self.stats),
            note: Arc::clone(&self.note),
            backoff: self.backoff,
            midi_message_max: self.midi_message_max,
        }
    }
}

impl<S: Synthesizer> RealtimeControl<S> {
    /// Replace the chip backend
    ///
    /// Takes the synthesizer lock directly; the audio callback renders silence
    /// while the switch is in progress.
    pub fn switch_chip(&self, chip: ChipType) {
        log::info!("switching chip to {chip}");
        self.synth.lock().switch_chip(chip);
    }

    /// Cut all sound
    pub fn silence(&self) {
        self.send(&Message::Silence);
    }

    /// Key off every channel
    pub fn note_off_all_chans(&self) {
        self.send(&Message::NoteOffAllChans);
    }

    /// Remember `note` for the next play/stop/chord call; sends nothing
    pub fn change_note(&self, note: u32) {
        self.note.store(note, Ordering::Relaxed);
    }

    /// Note most recently set with [`RealtimeControl::change_note`]
    pub fn note(&self) -> u32 {
        self.note.load(Ordering::Relaxed)
    }

    /// Key on the current note
    pub fn play_note(&self) {
        self.send(&Message::PlayNote(self.note()));
    }

    /// Key off the current note
    pub fn stop_note(&self) {
        self.send(&Message::StopNote(self.note()));
    }

    /// Key on a chord rooted at the current note
    pub fn play_chord(&self, chord: ChordType) {
        self.send(&Message::PlayChord {
            chord,
            note: self.note(),
        });
    }

    /// Play a major triad on the current note
    pub fn play_major_chord(&self) {
        self.play_chord(ChordType::Major);
    }

    /// Play a minor triad on the current note
    pub fn play_minor_chord(&self) {
        self.play_chord(ChordType::Minor);
    }

    /// Play an augmented triad on the current note
    pub fn play_augmented_chord(&self) {
        self.play_chord(ChordType::Augmented);
    }

    /// Play a diminished triad on the current note
    pub fn play_diminished_chord(&self) {
        self.play_chord(ChordType::Diminished);
    }

    /// Play a major seventh chord on the current note
    pub fn play_major7_chord(&self) {
        self.play_chord(ChordType::Major7);
    }

    /// Play a minor seventh chord on the current note
    pub fn play_minor7_chord(&self) {
        self.play_chord(ChordType::Minor7);
    }

    /// Program `instrument` on the synthesizer
    pub fn change_patch(&self, instrument: &Instrument, is_drum: bool) {
        self.send(&Message::PatchChange {
            instrument: *instrument,
            is_drum,
        });
    }

    /// Enable or disable the chip LFO
    pub fn change_lfo(&self, enabled: bool) {
        self.send(&Message::Lfo(enabled));
    }

    /// Set the chip LFO frequency index
    pub fn change_lfo_freq(&self, freq: i32) {
        self.send(&Message::LfoFreq(freq));
    }

    /// Queue raw MIDI bytes
    ///
    /// Never waits for ring space: messages longer than the configured
    /// maximum, or that do not fit in the MIDI ring, are dropped and counted.
    /// Concurrent MIDI senders are serialized for the duration of one put.
    /// Returns whether the message was queued.
    pub fn midi_event(&self, bytes: &[u8]) -> bool {
        let queued = bytes.len() <= self.midi_message_max
            && match MidiBytes::new(bytes) {
                Some(midi) => {
                    let mut buf = [0u8; MAX_WIRE_SIZE];
                    let len = Message::Midi(midi).encode(&mut buf);
                    self.midi.lock().put(&buf[..len])
                }
                None => false,
            };
        if !queued {
            self.stats.midi_dropped.fetch_add(1, Ordering::Relaxed);
        }
        queued
    }

    /// Query the synthesizer state
    ///
    /// Takes the synthesizer lock like [`RealtimeControl::switch_chip`].
    pub fn debug_info(&self) -> DebugInfo {
        self.synth.lock().debug_info()
    }

    /// Engine statistics
    pub fn stats(&self) -> RenderStats {
        self.stats.snapshot()
    }

    /// What the renderer is doing
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.stats.state.load(Ordering::Acquire))
    }

    fn send(&self, msg: &Message) {
        let mut buf = [0u8; MAX_WIRE_SIZE];
        let len = msg.encode(&mut buf);
        let mut producer = self.ctl.lock();
        let mut waited = false;
        while !producer.put(&buf[..len]) {
            if !waited {
                log::trace!("control ring full, waiting for the renderer");
                waited = true;
            }
            std::thread::sleep(self.backoff);
        }
    }
}

/// Audio-side end of the engine
pub struct RealtimeRenderer<S: Synthesizer> {
    synth: Arc<Mutex<S>>,
    ctl: RingConsumer,
    midi: RingConsumer,
    body: Box<[u8]>,
    stats: Arc<SharedStats>,
}

impl<S: Synthesizer> RealtimeRenderer<S> {
    /// Render `frame_count` interleaved stereo frames into `frames`
    ///
    /// Applies all control messages queued before this call, then all MIDI
    /// messages, then renders. If the synthesizer is locked by a control thread
    /// the block is zero-filled and nothing is consumed.
    pub fn generate(&mut self, frames: &mut [i16], frame_count: usize) {
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
        let len = frame_count.min(frames.len() / 2) * 2;

        let Some(mut synth) = self.synth.try_lock() else {
            frames[..len].fill(0);
            self.stats.silenced_callbacks.fetch_add(1, Ordering::Relaxed);
            return;
        };

        self.stats.set_state(EngineState::Draining);
        drain(&mut self.ctl, &mut self.body, &mut *synth, &self.stats);
        drain(&mut self.midi, &mut self.body, &mut *synth, &self.stats);

        self.stats.set_state(EngineState::Rendering);
        synth.generate(&mut frames[..len], len / 2);
        self.stats.set_state(EngineState::Idle);
    }
}

/// Apply every complete message present in `ring` at entry
fn drain<S: Synthesizer>(
    ring: &mut RingConsumer,
    body: &mut [u8],
    synth: &mut S,
    stats: &SharedStats,
) {
    let mut budget = ring.size_used();
    let mut header_bytes = [0u8; HEADER_SIZE];

    while budget >= HEADER_SIZE && ring.peek(&mut header_bytes) {
        let header = MessageHeader::decode(&header_bytes);
        let total = header.wire_size();
        if total > budget {
            break;
        }
        ring.discard(HEADER_SIZE);
        budget -= total;

        let size = header.size as usize;
        if size > body.len() {
            ring.discard(size);
            stats.messages_skipped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        let payload = &mut body[..size];
        ring.get(payload);

        match Message::decode(header.tag, payload) {
            Some(msg) => {
                apply(msg, synth);
                stats.messages_applied.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                stats.messages_skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn apply<S: Synthesizer>(msg: Message, synth: &mut S) {
    match msg {
        Message::Midi(midi) => process_midi(midi.as_bytes(), synth),
        Message::Silence => synth.silence(),
        Message::NoteOffAllChans => synth.note_off_all_chans(),
        Message::PlayNote(note) => {
            synth.change_note(note as i32);
            synth.play_note();
        }
        Message::StopNote(note) => {
            synth.change_note(note as i32);
            synth.stop_note();
        }
        Message::PlayChord { chord, note } => {
            synth.change_note(note as i32);
            synth.play_chord(chord);
        }
        Message::PatchChange {
            instrument,
            is_drum,
        } => synth.change_patch(&instrument, is_drum),
        Message::Lfo(enabled) => synth.change_lfo(enabled),
        Message::LfoFreq(freq) => synth.change_lfo_freq(freq),
    }
}

/// Translate a 3-byte channel voice message; anything else is ignored
fn process_midi<S: Synthesizer>(bytes: &[u8], synth: &mut S) {
    let [status, data1, data2] = match *bytes {
        [a, b, c] => [a, b & 0x7F, c & 0x7F],
        _ => return,
    };
    let mut kind = status >> 4;
    if kind == 0x9 && data2 == 0 {
        kind = 0x8;
    }
    match kind {
        0x8 => {
            synth.change_note(data1 as i32);
            synth.stop_note();
        }
        0x9 => {
            synth.change_note(data1 as i32);
            synth.play_note();
        }
        0xB => match data1 {
            CC_ALL_SOUND_OFF => synth.silence(),
            CC_ALL_NOTES_OFF => synth.note_off_all_chans(),
            _ => {}
        },
        _ => {}
    }
}

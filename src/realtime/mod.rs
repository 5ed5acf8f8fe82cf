//! Realtime control and MIDI dispatch
//!
//! The control thread and the MIDI input side serialize typed [`Message`]s
//! into two lock-free single-producer/single-consumer byte rings. Once per
//! audio callback the [`RealtimeRenderer`] drains the control ring, then the
//! MIDI ring, applies every message to the synthesizer and renders a block.
//!
//! - [`ring_buffer`]: fixed-capacity SPSC byte ring with put/peek/get/discard
//! - [`message`]: tagged message codec (fixed header + fixed-size payload per tag)
//! - [`engine`]: the control handle and the realtime renderer

pub mod engine;
pub mod message;
pub mod ring_buffer;

pub use engine::{EngineState, RealtimeControl, RealtimeGenerator, RealtimeRenderer, RenderStats};
pub use message::{Message, MessageHeader, MessageTag, MidiBytes};
pub use ring_buffer::{RingBuffer, RingConsumer, RingProducer};

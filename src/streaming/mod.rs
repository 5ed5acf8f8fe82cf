//! Audio device output for the realtime engine using rodio
//!
//! [`EngineSource`] adapts a [`RealtimeRenderer`] to a rodio [`Source`]: it
//! renders fixed-size blocks of interleaved stereo frames and hands them out
//! sample by sample. Rendering happens on rodio's mixer thread, so that thread
//! plays the role of the audio callback.

use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::realtime::RealtimeRenderer;
use crate::synth::Synthesizer;
use crate::Result;

/// Frames rendered per block
pub const BLOCK_FRAMES: usize = 512;

const CHANNELS: u16 = 2;

/// rodio source pulling blocks from a renderer
pub struct EngineSource<S: Synthesizer> {
    renderer: RealtimeRenderer<S>,
    sample_rate: u32,
    finished: Arc<AtomicBool>,
    buffer: Vec<i16>,
    buffer_pos: usize,
}

impl<S: Synthesizer> EngineSource<S> {
    /// Wrap `renderer`; the iterator ends once `finished` is set
    pub fn new(renderer: RealtimeRenderer<S>, sample_rate: u32, finished: Arc<AtomicBool>) -> Self {
        EngineSource {
            renderer,
            sample_rate,
            finished,
            buffer: vec![0; BLOCK_FRAMES * CHANNELS as usize],
            buffer_pos: BLOCK_FRAMES * CHANNELS as usize, // render on first pull
        }
    }
}

impl<S: Synthesizer> Source for EngineSource<S> {
    fn current_frame_len(&self) -> Option<usize> {
        // Samples left in the current block, or a full block before the next render
        let left = self.buffer.len() - self.buffer_pos;
        Some(if left == 0 { self.buffer.len() } else { left })
    }

    fn channels(&self) -> u16 {
        CHANNELS
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl<S: Synthesizer> Iterator for EngineSource<S> {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }
        if self.buffer_pos >= self.buffer.len() {
            self.renderer.generate(&mut self.buffer, BLOCK_FRAMES);
            self.buffer_pos = 0;
        }
        let sample = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Some(sample)
    }
}

/// Audio playback device using rodio
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Open the default output device and start playing `renderer`
    ///
    /// # Errors
    ///
    /// Fails when no output device is available.
    pub fn new<S: Synthesizer + 'static>(
        renderer: RealtimeRenderer<S>,
        sample_rate: u32,
    ) -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| format!("Failed to create audio stream: {}", e))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| format!("Failed to create audio sink: {}", e))?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(EngineSource::new(renderer, sample_rate, Arc::clone(&finished)));
        log::info!("audio output started at {sample_rate} Hz");

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause playback
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume playback
    pub fn play(&self) {
        self.sink.play();
    }

    /// Stop pulling from the renderer
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.finish();
        self.sink.stop();
    }
}

//! Virtual chip state trackers
//!
//! A tracker shadows the register file of one chip family and turns key-on
//! edges into [`Instrument`] snapshots. Several trackers can feed one
//! [`CaptureSink`] so a trace driving more than one chip still produces a
//! single ordered instrument list.
//!
//! Capture protocol:
//! - every write updates the shadow, which persists for the whole trace
//! - a key-on edge (key mask going from zero to non-zero) latches a snapshot of
//!   the channel as it is at that write
//! - [`ChipTracker::analyze_epoch`] (called on every wait) hands latched
//!   snapshots to the sink in channel order
//! - a second edge on a channel before analysis flushes the first snapshot
//!   immediately, so every edge yields exactly one capture
//! - [`ChipTracker::finish`] flushes whatever is still latched

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::config::ImportOptions;
use crate::instrument::Instrument;

pub mod opm;
pub mod opn;

pub use opm::Ym2151Tracker;
pub use opn::OpnTracker;

/// Chip families understood by the trackers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipFamily {
    /// YM2612 (OPN2)
    Ym2612,
    /// YM2608 (OPNA) FM part
    Ym2608,
    /// YM2151 (OPM)
    Ym2151,
}

impl fmt::Display for ChipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChipFamily::Ym2612 => "YM2612",
            ChipFamily::Ym2608 => "YM2608",
            ChipFamily::Ym2151 => "YM2151",
        })
    }
}

/// Register-level consumer for one chip family
pub trait ChipTracker {
    /// Family this tracker decodes
    fn family(&self) -> ChipFamily;

    /// Feed one register write
    fn pass_reg(&mut self, port: u8, reg: u8, value: u8);

    /// Hand instruments latched since the previous epoch to the sink
    fn analyze_epoch(&mut self);

    /// Flush at end of stream
    fn finish(&mut self) {
        self.analyze_epoch();
    }
}

/// Ordered collection of captured instruments shared between trackers
#[derive(Debug, Default)]
pub struct CaptureSink {
    options: ImportOptions,
    instruments: Vec<Instrument>,
    seen: HashSet<Instrument>,
    key_ons: usize,
}

/// Handle through which trackers share one sink
pub type SharedSink = Rc<RefCell<CaptureSink>>;

impl CaptureSink {
    /// Create an empty sink
    pub fn new(options: ImportOptions) -> Self {
        CaptureSink {
            options,
            ..CaptureSink::default()
        }
    }

    /// Create a sink ready to be shared between trackers
    pub fn shared(options: ImportOptions) -> SharedSink {
        Rc::new(RefCell::new(Self::new(options)))
    }

    /// Record a snapshot taken on `channel` of a `family` chip
    ///
    /// Names it "<prefix> <n> ch<channel>" with `n` its 1-based position in
    /// the output. With dedupe enabled a snapshot equal (ignoring the name) to
    /// an earlier one is counted but not stored; returns whether it was stored.
    pub fn capture(&mut self, family: ChipFamily, channel: usize, mut instrument: Instrument) -> bool {
        self.key_ons += 1;
        instrument.set_name("");
        if self.options.dedupe && !self.seen.insert(instrument) {
            log::trace!("{family} ch{channel}: duplicate instrument skipped");
            return false;
        }
        let index = self.instruments.len() + 1;
        instrument.set_name(&format!("{} {} ch{}", self.options.name_prefix, index, channel));
        log::debug!("{family}: captured \"{}\"", instrument.name());
        self.instruments.push(instrument);
        true
    }

    /// Instruments in capture order
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Number of key-on edges observed, including deduplicated ones
    pub fn key_on_count(&self) -> usize {
        self.key_ons
    }

    /// Take the captured instruments, leaving the sink empty
    pub fn take_instruments(&mut self) -> Vec<Instrument> {
        self.seen.clear();
        std::mem::take(&mut self.instruments)
    }
}

/// Per-channel key masks and latched snapshots
#[derive(Debug, Clone)]
pub(crate) struct KeyLatch<const N: usize> {
    masks: [u8; N],
    pending: [Option<Instrument>; N],
}

impl<const N: usize> KeyLatch<N> {
    pub(crate) fn new() -> Self {
        KeyLatch {
            masks: [0; N],
            pending: [None; N],
        }
    }

    /// Store the new slot mask for `channel`; true on a key-on edge
    pub(crate) fn update(&mut self, channel: usize, mask: u8) -> bool {
        let edge = self.masks[channel] == 0 && mask != 0;
        self.masks[channel] = mask;
        edge
    }

    /// Latch `snapshot`, flushing an older one still waiting on this channel
    pub(crate) fn latch(
        &mut self,
        sink: &SharedSink,
        family: ChipFamily,
        channel: usize,
        snapshot: Instrument,
    ) {
        if let Some(previous) = self.pending[channel].replace(snapshot) {
            sink.borrow_mut().capture(family, channel, previous);
        }
    }

    /// Hand every latched snapshot to the sink in channel order
    pub(crate) fn flush(&mut self, sink: &SharedSink, family: ChipFamily) {
        for (channel, slot) in self.pending.iter_mut().enumerate() {
            if let Some(snapshot) = slot.take() {
                sink.borrow_mut().capture(family, channel, snapshot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(algorithm: u8) -> Instrument {
        let mut ins = Instrument::default();
        ins.algorithm = algorithm;
        ins
    }

    #[test]
    fn test_capture_names_in_order() {
        let mut sink = CaptureSink::new(ImportOptions::default());
        sink.capture(ChipFamily::Ym2612, 2, patch(1));
        sink.capture(ChipFamily::Ym2151, 7, patch(2));
        let names: Vec<&str> = sink.instruments().iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["Ins 1 ch2", "Ins 2 ch7"]);
    }

    #[test]
    fn test_dedupe_ignores_names() {
        let options = ImportOptions {
            dedupe: true,
            name_prefix: "VGM".into(),
        };
        let mut sink = CaptureSink::new(options);
        assert!(sink.capture(ChipFamily::Ym2612, 0, patch(3)));
        assert!(!sink.capture(ChipFamily::Ym2612, 1, patch(3)));
        assert!(sink.capture(ChipFamily::Ym2612, 1, patch(4)));
        assert_eq!(sink.key_on_count(), 3);
        assert_eq!(sink.instruments().len(), 2);
        assert_eq!(sink.instruments()[1].name(), "VGM 2 ch1");
    }

    #[test]
    fn test_latch_edges_and_flush_order() {
        let sink = CaptureSink::shared(ImportOptions::default());
        let mut latch = KeyLatch::<3>::new();

        assert!(latch.update(2, 0xF0));
        latch.latch(&sink, ChipFamily::Ym2612, 2, patch(2));
        assert!(!latch.update(2, 0x30)); // still sounding
        assert!(latch.update(0, 0x10));
        latch.latch(&sink, ChipFamily::Ym2612, 0, patch(0));
        assert!(sink.borrow().instruments().is_empty());

        latch.flush(&sink, ChipFamily::Ym2612);
        let algs: Vec<u8> = sink.borrow().instruments().iter().map(|i| i.algorithm).collect();
        assert_eq!(algs, vec![0, 2]);
    }

    #[test]
    fn test_second_edge_before_flush_keeps_both() {
        let sink = CaptureSink::shared(ImportOptions::default());
        let mut latch = KeyLatch::<1>::new();
        assert!(latch.update(0, 0xF0));
        latch.latch(&sink, ChipFamily::Ym2612, 0, patch(5));
        assert!(!latch.update(0, 0x00)); // key off, nothing latched
        assert!(latch.update(0, 0xF0));
        latch.latch(&sink, ChipFamily::Ym2612, 0, patch(6));
        latch.flush(&sink, ChipFamily::Ym2612);
        assert_eq!(sink.borrow().instruments().len(), 2);
        assert_eq!(sink.borrow().instruments()[0].algorithm, 5);
    }
}
